//! Region classification from a geocoder place description.
//!
//! The description is a comma-separated hierarchy from specific to general:
//! `"Краснознаменск, городской округ Краснознаменск, Московская область, Россия"`.
//! Segments are scanned from the general end; municipal-level segments are
//! skipped, the first segment that looks like a federal subject wins.
//! Best-effort: there is no authoritative region list behind this.

use serde::Serialize;

/// Trailing country token stripped before scanning.
const COUNTRY: &str = "Россия";

/// Lower-case markers of municipal units that sit between the city and its region.
const MUNICIPAL_MARKERS: &[&str] = &[
    "городской округ",
    "муниципальный округ",
    "район",
    "поселение",
];

/// Lower-case subject-type words and federal-city markers.
const REGION_KEYWORDS: &[&str] = &[
    "область",
    "край",
    "республика",
    "автономный округ",
    "г.",
    "город",
    "москва",
    "санкт-петербург",
    "севастополь",
];

/// Lower-case republic short names; a segment containing one is a region.
const SHORT_REPUBLICS: &[&str] = &[
    "адыгея",
    "хакасия",
    "башкирия",
    "татарстан",
    "коми",
    "карелия",
    "мордовия",
    "удмуртия",
    "чувашия",
    "марий эл",
    "северная осетия",
    "дагестан",
    "ингушетия",
    "кабардино-балкария",
    "карачаево-черкесия",
    "тыва",
    "алтай",
    "бурятия",
    "якутия",
    "крым",
];

/// Which rule produced a region label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionTier {
    /// Segment contains a region-type keyword.
    Keyword,
    /// Segment carries a republic short name (`Хакасия`, `Северная Осетия`).
    ShortName,
    /// Nothing looked like a region; the most general segment was taken verbatim.
    Fallback,
}

impl std::fmt::Display for RegionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyword => write!(f, "keyword"),
            Self::ShortName => write!(f, "short_name"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedRegion {
    pub label: String,
    pub tier: RegionTier,
}

/// Derive a region label from a place description. `None` for blank input.
pub fn classify_region(display: &str) -> Option<ClassifiedRegion> {
    let mut parts: Vec<&str> = display
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.last() == Some(&COUNTRY) {
        parts.pop();
    }

    for part in parts.iter().rev() {
        let lower = part.to_lowercase();
        if MUNICIPAL_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        if REGION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            return Some(ClassifiedRegion {
                label: part.replace('—', "-"),
                tier: RegionTier::Keyword,
            });
        }
        if SHORT_REPUBLICS.iter().any(|name| lower.contains(name)) {
            return Some(ClassifiedRegion {
                label: part.replace('—', "-"),
                tier: RegionTier::ShortName,
            });
        }
    }

    parts.last().map(|p| ClassifiedRegion {
        label: (*p).to_string(),
        tier: RegionTier::Fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(display: &str) -> Option<String> {
        classify_region(display).map(|r| r.label)
    }

    #[test]
    fn skips_urban_okrug_and_country() {
        let r = classify_region(
            "Краснознаменск, городской округ Краснознаменск, Московская область, Россия",
        )
        .unwrap();
        assert_eq!(r.label, "Московская область");
        assert_eq!(r.tier, RegionTier::Keyword);
    }

    #[test]
    fn picks_most_general_region_segment() {
        assert_eq!(
            label("Вязьма, Вяземский район, Смоленская область, Центральный федеральный округ, Россия")
                .as_deref(),
            // federal district has no region keyword and comes last; the oblast is found next
            Some("Смоленская область")
        );
    }

    #[test]
    fn krai_and_republic() {
        assert_eq!(
            label("Белокуриха, городской округ Белокуриха, Алтайский край, Россия").as_deref(),
            Some("Алтайский край")
        );
        assert_eq!(
            label("Сибай, городской округ Сибай, Республика Башкортостан, Россия").as_deref(),
            Some("Республика Башкортостан")
        );
    }

    #[test]
    fn autonomous_okrug_with_em_dash() {
        let r = classify_region(
            "Лангепас, городской округ Лангепас, Ханты-Мансийский автономный округ — Югра, Россия",
        )
        .unwrap();
        assert_eq!(r.label, "Ханты-Мансийский автономный округ - Югра");
        assert_eq!(r.tier, RegionTier::Keyword);
    }

    #[test]
    fn short_republic_name() {
        let r = classify_region("Абаза, Хакасия, Россия").unwrap();
        assert_eq!(r.label, "Хакасия");
        assert_eq!(r.tier, RegionTier::ShortName);

        let r = classify_region("Моздок, Моздокский район, Северная Осетия — Алания, Россия").unwrap();
        assert_eq!(r.label, "Северная Осетия - Алания");
        assert_eq!(r.tier, RegionTier::ShortName);
    }

    #[test]
    fn fallback_to_last_segment() {
        let r = classify_region("Нарьян-Мар, Ненецкий АО, Россия").unwrap();
        assert_eq!(r.label, "Ненецкий АО");
        assert_eq!(r.tier, RegionTier::Fallback);
    }

    #[test]
    fn fallback_when_only_municipal_segments() {
        let r = classify_region("Кольчугино, Кольчугинский район").unwrap();
        assert_eq!(r.label, "Кольчугинский район");
        assert_eq!(r.tier, RegionTier::Fallback);
    }

    #[test]
    fn blank_input() {
        assert!(classify_region("").is_none());
        assert!(classify_region(" , ,").is_none());
        assert!(classify_region("Россия").is_none());
    }

    #[test]
    fn federal_city() {
        assert_eq!(
            label("Зеленоград, Москва, Россия").as_deref(),
            Some("Москва")
        );
    }
}
