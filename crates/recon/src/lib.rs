//! `gorodindex-recon`: reconciliation engine for small-city records.
//!
//! Pure engine crate: receives pre-loaded spreadsheet rows and free text,
//! returns reconciled cities, region labels and unemployment rates.
//! No network, spreadsheet or database dependencies.

pub mod classify;
pub mod engine;
pub mod extract;
pub mod matcher;
pub mod model;

pub use classify::{classify_region, ClassifiedRegion, RegionTier};
pub use engine::reconcile;
pub use matcher::{default_aliases, match_unemployment, AliasTable, MatchTier, UnemploymentTable};
pub use model::{
    EnrichedCity, InfrastructureCounts, PopulationRecord, PopulationWindow, Reconciliation,
    ReconcileReport, ReconciledCity, TaxRecord,
};
