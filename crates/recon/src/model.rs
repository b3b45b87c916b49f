use serde::Serialize;

use crate::classify::ClassifiedRegion;
use crate::matcher::MatchTier;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One row of the tax-revenue spreadsheet. Source of truth for which cities are in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxRecord {
    /// Canonical prefixed name, e.g. `г. Вязьма`.
    pub name: String,
    /// OKTMO municipal code.
    pub oktmo: String,
    /// Total declared NDFL revenue, roubles.
    pub ndfl_total: i64,
}

/// One row of the population spreadsheet, before any cleaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationRecord {
    /// Noisy free-text settlement label.
    pub label: String,
    /// Population as it appeared in the cell (`"45 000"`, `"45000"`, `""`).
    pub population_raw: String,
}

/// Inclusive population bounds for cities kept in the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationWindow {
    pub min: u32,
    pub max: u32,
}

impl Default for PopulationWindow {
    fn default() -> Self {
        Self {
            min: 12_000,
            max: 100_000,
        }
    }
}

impl PopulationWindow {
    pub fn contains(&self, population: f64) -> bool {
        population >= f64::from(self.min) && population <= f64::from(self.max)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A population row joined to its tax-dataset counterpart.
///
/// Exactly one per municipal code in a [`Reconciliation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledCity {
    /// City name with the `г.` prefix stripped.
    pub name: String,
    /// The tax-dataset name the row was matched on.
    pub canonical_name: String,
    pub oktmo: String,
    pub population: u32,
    pub ndfl_total: i64,
}

/// Row accounting for one reconciliation run.
///
/// Every population row lands in exactly one of `accepted`, `invalid_population`,
/// `out_of_range` or `unrecognized_label`; `accepted` rows are then either kept
/// or collapsed as duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub tax_rows: usize,
    pub population_rows: usize,
    /// Population rows whose label matched a tax city and whose number was in range.
    pub accepted: usize,
    /// Population cell empty or not a number.
    pub invalid_population: usize,
    /// Numeric population outside the window.
    pub out_of_range: usize,
    /// No `г. <name>` candidate in the label matched a tax city.
    pub unrecognized_label: usize,
    /// Accepted rows dropped because a lower-population row for the same city won.
    pub duplicates_collapsed: usize,
    /// Tax cities that no accepted population row mapped to (inner-join drop).
    pub tax_without_population: usize,
    /// Tax rows whose name repeated an earlier row (first one is used).
    pub duplicate_tax_names: usize,
    /// Cities dropped because their municipal code was already taken.
    pub duplicate_codes: usize,
    /// Final working-set size.
    pub kept: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub cities: Vec<ReconciledCity>,
    pub report: ReconcileReport,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// Feature counts inside a resolved area. A feature whose query failed is 0, never absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InfrastructureCounts {
    pub schools: u32,
    pub gas_stations: u32,
    pub bus_stops: u32,
}

/// A reconciled city with everything the batch learned about it; one commit item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedCity {
    pub city: ReconciledCity,
    pub region: Option<ClassifiedRegion>,
    pub unemployment_rate: Option<f64>,
    pub unemployment_tier: Option<MatchTier>,
    pub infrastructure: InfrastructureCounts,
}

impl EnrichedCity {
    /// Region label as stored; empty when classification found nothing.
    pub fn region_label(&self) -> &str {
        self.region.as_ref().map(|r| r.label.as_str()).unwrap_or("")
    }
}
