use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

/// Region → unemployment rate (%), in spreadsheet row order.
///
/// Order matters: the fuzzy tier returns the first entry that matches.
#[derive(Debug, Clone, Default)]
pub struct UnemploymentTable {
    entries: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl UnemploymentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row. A repeated region takes the later rate but keeps
    /// its first position.
    pub fn insert(&mut self, region: impl Into<String>, rate: f64) {
        let region = region.into();
        if let Some(&i) = self.index.get(&region) {
            self.entries[i].1 = rate;
            return;
        }
        self.index.insert(region.clone(), self.entries.len());
        self.entries.push((region, rate));
    }

    pub fn get(&self, region: &str) -> Option<f64> {
        self.index.get(region).map(|&i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for UnemploymentTable {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (region, rate) in iter {
            table.insert(region, rate);
        }
        table
    }
}

/// Short / colloquial region name → formal name used in the statistics table.
pub type AliasTable = BTreeMap<String, String>;

/// Built-in aliases: republic short names, federal cities, truncated oblast names.
pub fn default_aliases() -> AliasTable {
    [
        ("Хакасия", "Республика Хакасия"),
        ("Башкирия", "Республика Башкортостан"),
        ("Адыгея", "Республика Адыгея"),
        ("Татарстан", "Республика Татарстан"),
        ("Коми", "Республика Коми"),
        ("Карелия", "Республика Карелия"),
        ("Мордовия", "Республика Мордовия"),
        ("Удмуртия", "Удмуртская Республика"),
        ("Чувашия", "Чувашская Республика"),
        ("Марий Эл", "Республика Марий Эл"),
        ("Северная Осетия", "Республика Северная Осетия - Алания"),
        ("Северная Осетия - Алания", "Республика Северная Осетия - Алания"),
        ("Дагестан", "Республика Дагестан"),
        ("Ингушетия", "Республика Ингушетия"),
        ("Кабардино-Балкария", "Кабардино-Балкарская Республика"),
        ("Карачаево-Черкесия", "Карачаево-Черкесская Республика"),
        ("Тыва", "Республика Тыва"),
        ("Алтай", "Республика Алтай"),
        ("Бурятия", "Республика Бурятия"),
        ("Якутия", "Республика Саха (Якутия)"),
        ("Москва", "г. Москва"),
        ("Санкт-Петербург", "г.Санкт-Петербург"),
        ("Севастополь", "г. Севастополь"),
        ("Крым", "Республика Крым"),
        ("Ростовская", "Ростовская область"),
        ("Воронежская", "Воронежская область"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Which lookup tier found the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Alias,
    Fuzzy,
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Alias => write!(f, "alias"),
            Self::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

fn squash(s: &str) -> String {
    s.replace(' ', "").to_lowercase()
}

/// Resolve a region label to an unemployment rate.
///
/// Tiers, first hit wins: exact key, alias then exact key, then space-free
/// lower-case containment in either direction against each table key in order.
pub fn match_unemployment(
    region: &str,
    table: &UnemploymentTable,
    aliases: &AliasTable,
) -> Option<(f64, MatchTier)> {
    if region.trim().is_empty() {
        return None;
    }

    if let Some(rate) = table.get(region) {
        return Some((rate, MatchTier::Exact));
    }

    if let Some(rate) = aliases.get(region).and_then(|formal| table.get(formal)) {
        return Some((rate, MatchTier::Alias));
    }

    let wanted = squash(region);
    table.iter().find_map(|(key, rate)| {
        let candidate = squash(key);
        if candidate.is_empty() {
            return None;
        }
        (wanted.contains(&candidate) || candidate.contains(&wanted)).then_some((rate, MatchTier::Fuzzy))
    })
}
