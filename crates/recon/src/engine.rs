use std::collections::{HashMap, HashSet};

use crate::extract::{clean_number, extract_valid_city, normalize_city_name, strip_city_prefix};
use crate::model::{
    PopulationRecord, PopulationWindow, ReconcileReport, ReconciledCity, Reconciliation, TaxRecord,
};

/// Join noisy population rows to canonical tax-revenue cities.
///
/// A population row survives when one of its `г. <name>` candidates is a tax
/// city and its cleaned population lies inside `window`. Survivors are sorted by
/// (name, population) and the first row per name (lowest population) is kept;
/// after that the first city per municipal code is kept. Nothing here fails:
/// unusable rows are counted in the report and dropped.
pub fn reconcile(
    tax: &[TaxRecord],
    population: &[PopulationRecord],
    window: PopulationWindow,
) -> Reconciliation {
    let mut report = ReconcileReport {
        tax_rows: tax.len(),
        population_rows: population.len(),
        ..Default::default()
    };

    // Tax index: normalized name -> first row carrying it
    let mut by_name: HashMap<String, &TaxRecord> = HashMap::new();
    for record in tax {
        let key = normalize_city_name(&record.name);
        if key.is_empty() {
            continue;
        }
        if by_name.contains_key(&key) {
            report.duplicate_tax_names += 1;
        } else {
            by_name.insert(key, record);
        }
    }
    let valid: HashSet<String> = by_name.keys().cloned().collect();

    let mut accepted: Vec<(String, f64, &TaxRecord)> = Vec::new();
    for row in population {
        let Some(name) = extract_valid_city(&row.label, &valid) else {
            report.unrecognized_label += 1;
            continue;
        };
        let Some(value) = clean_number(&row.population_raw) else {
            report.invalid_population += 1;
            continue;
        };
        if !window.contains(value) {
            report.out_of_range += 1;
            continue;
        }
        if let Some(record) = by_name.get(&name) {
            accepted.push((name, value, *record));
        }
    }
    report.accepted = accepted.len();

    accepted.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let matched_names: HashSet<&str> = accepted.iter().map(|(n, _, _)| n.as_str()).collect();
    report.tax_without_population = valid.len() - matched_names.len();

    let mut seen_names: HashSet<&str> = HashSet::new();
    let mut seen_codes: HashSet<&str> = HashSet::new();
    let mut cities = Vec::new();

    for (name, value, record) in &accepted {
        if !seen_names.insert(name.as_str()) {
            report.duplicates_collapsed += 1;
            continue;
        }
        if !seen_codes.insert(record.oktmo.as_str()) {
            report.duplicate_codes += 1;
            continue;
        }
        cities.push(ReconciledCity {
            name: strip_city_prefix(name),
            canonical_name: name.clone(),
            oktmo: record.oktmo.clone(),
            population: value.round() as u32,
            ndfl_total: record.ndfl_total,
        });
    }

    report.kept = cities.len();
    Reconciliation { cities, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tax(name: &str, oktmo: &str, ndfl: i64) -> TaxRecord {
        TaxRecord {
            name: name.into(),
            oktmo: oktmo.into(),
            ndfl_total: ndfl,
        }
    }

    fn pop(label: &str, raw: &str) -> PopulationRecord {
        PopulationRecord {
            label: label.into(),
            population_raw: raw.into(),
        }
    }

    #[test]
    fn vyazma_scenario() {
        let out = reconcile(
            &[tax("г. Вязьма", "66000000", 500_000_000)],
            &[pop("пос. Вязьма (город Вязьма)", "45 000")],
            PopulationWindow::default(),
        );
        assert_eq!(
            out.cities,
            vec![ReconciledCity {
                name: "Вязьма".into(),
                canonical_name: "г. Вязьма".into(),
                oktmo: "66000000".into(),
                population: 45000,
                ndfl_total: 500_000_000,
            }]
        );
        assert_eq!(out.report.kept, 1);
        assert_eq!(out.report.tax_without_population, 0);
    }

    #[test]
    fn population_window_is_inclusive() {
        let taxes = vec![
            tax("г. Аа", "1", 1),
            tax("г. Бб", "2", 1),
            tax("г. Вв", "3", 1),
            tax("г. Гг", "4", 1),
        ];
        let pops = vec![
            pop("г. Аа", "12000"),
            pop("г. Бб", "11999"),
            pop("г. Вв", "100000"),
            pop("г. Гг", "100001"),
        ];
        let out = reconcile(&taxes, &pops, PopulationWindow::default());
        let names: Vec<&str> = out.cities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Аа", "Вв"]);
        assert_eq!(out.report.out_of_range, 2);
        assert_eq!(out.report.tax_without_population, 2);
    }

    #[test]
    fn duplicate_rows_keep_lowest_population() {
        let out = reconcile(
            &[tax("г. Вязьма", "66000000", 10)],
            &[
                pop("г. Вязьма", "50 000"),
                pop("Вязьма (г. Вязьма)", "45 000"),
                pop("г.Вязьма, ж/д станция", "47000"),
            ],
            PopulationWindow::default(),
        );
        assert_eq!(out.cities.len(), 1);
        assert_eq!(out.cities[0].population, 45000);
        assert_eq!(out.report.accepted, 3);
        assert_eq!(out.report.duplicates_collapsed, 2);
    }

    #[test]
    fn rows_without_tax_counterpart_are_dropped() {
        let out = reconcile(
            &[tax("г. Вязьма", "66000000", 10)],
            &[pop("г. Сафоново", "40000"), pop("дер. Ивановка", "20000")],
            PopulationWindow::default(),
        );
        assert!(out.cities.is_empty());
        assert_eq!(out.report.unrecognized_label, 2);
        assert_eq!(out.report.tax_without_population, 1);
    }

    #[test]
    fn malformed_population_is_excluded() {
        let out = reconcile(
            &[tax("г. Вязьма", "66000000", 10)],
            &[pop("г. Вязьма", "н/д"), pop("г. Вязьма", "")],
            PopulationWindow::default(),
        );
        assert!(out.cities.is_empty());
        assert_eq!(out.report.invalid_population, 2);
    }

    #[test]
    fn output_sorted_by_name() {
        let out = reconcile(
            &[
                tax("г. Ярцево", "3", 1),
                tax("г. Вязьма", "1", 1),
                tax("г. Сафоново", "2", 1),
            ],
            &[
                pop("г. Ярцево", "42000"),
                pop("г. Сафоново", "40000"),
                pop("г. Вязьма", "45000"),
            ],
            PopulationWindow::default(),
        );
        let names: Vec<&str> = out.cities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Вязьма", "Сафоново", "Ярцево"]);
    }

    #[test]
    fn municipal_code_kept_once() {
        let out = reconcile(
            &[tax("г. Вязьма", "66000000", 1), tax("г. Вязьма-Брянская", "66000000", 2)],
            &[pop("г. Вязьма", "45000"), pop("г. Вязьма-Брянская", "20000")],
            PopulationWindow::default(),
        );
        assert_eq!(out.cities.len(), 1);
        assert_eq!(out.cities[0].name, "Вязьма");
        assert_eq!(out.report.duplicate_codes, 1);
    }

    #[test]
    fn duplicate_tax_names_use_first_row() {
        let out = reconcile(
            &[tax("г. Вязьма", "66000000", 1), tax("г.  Вязьма ", "99999999", 2)],
            &[pop("г. Вязьма", "45000")],
            PopulationWindow::default(),
        );
        assert_eq!(out.cities[0].oktmo, "66000000");
        assert_eq!(out.report.duplicate_tax_names, 1);
    }

    #[test]
    fn reconciliation_is_deterministic() {
        let taxes = vec![tax("г. Вязьма", "1", 1), tax("г. Сафоново", "2", 1)];
        let pops = vec![
            pop("г. Сафоново", "40000"),
            pop("г. Вязьма", "46000"),
            pop("г. Вязьма", "45000"),
        ];
        let a = reconcile(&taxes, &pops, PopulationWindow::default());
        let b = reconcile(&taxes, &pops, PopulationWindow::default());
        assert_eq!(a, b);
    }

    #[test]
    fn custom_window() {
        let out = reconcile(
            &[tax("г. Вязьма", "1", 1)],
            &[pop("г. Вязьма", "45000")],
            PopulationWindow { min: 50_000, max: 60_000 },
        );
        assert!(out.cities.is_empty());
        assert_eq!(out.report.out_of_range, 1);
    }

    proptest! {
        #[test]
        fn kept_iff_inside_window(population in 0u32..200_000) {
            let out = reconcile(
                &[tax("г. Вязьма", "1", 1)],
                &[pop("г. Вязьма", &population.to_string())],
                PopulationWindow::default(),
            );
            let inside = (12_000..=100_000).contains(&population);
            prop_assert_eq!(out.cities.len(), usize::from(inside));
            prop_assert_eq!(out.report.out_of_range, usize::from(!inside));
        }
    }
}
