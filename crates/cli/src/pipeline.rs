//! Batch pipeline: load → reconcile → per-city enrichment → one commit.
//!
//! Cities are processed strictly one after another with a fixed pause
//! between them. Nothing touches the store until every city is done, so a
//! cancelled or failed run leaves the store as it was.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use gorodindex_config::{ConfigError, Settings};
use gorodindex_io::{load_inputs, InputSet, LoadError, Store, StoreError};
use gorodindex_osm_client::{
    CancelToken, Cancelled, FeatureCounter, Geocoder, ResolveError, ResolvedLocation, Sleeper,
};
use gorodindex_recon::{
    classify_region, default_aliases, match_unemployment, reconcile, AliasTable, ClassifiedRegion,
    EnrichedCity, MatchTier, PopulationWindow, ReconcileReport, ReconciledCity, Reconciliation,
    RegionTier, UnemploymentTable,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Batch-fatal failures. Per-city and per-feature failures never surface here.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Load(LoadError),
    Store(StoreError),
    /// HTTP client could not be constructed.
    Client(String),
    Cancelled,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{}", e),
            Self::Load(e) => write!(f, "{}", e),
            Self::Store(e) => write!(f, "{}", e),
            Self::Client(msg) => write!(f, "cannot create HTTP client: {}", msg),
            Self::Cancelled => write!(f, "run cancelled before commit; nothing was written"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<LoadError> for PipelineError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<Cancelled> for PipelineError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Read all three spreadsheets and reconcile tax and population rows.
pub fn load_and_reconcile(settings: &Settings) -> Result<(InputSet, Reconciliation), PipelineError> {
    let inputs = load_inputs(
        &settings.inputs.tax_path(),
        &settings.inputs.population_path(),
        &settings.inputs.unemployment_path(),
        settings.data_year,
    )?;
    log::info!(
        "loaded {} tax rows ({} skipped), {} population rows ({} skipped), {} unemployment regions ({} skipped)",
        inputs.tax.rows.len(),
        inputs.tax.skipped,
        inputs.population.rows.len(),
        inputs.population.skipped,
        inputs.unemployment.len(),
        inputs.unemployment_skipped,
    );

    let window = PopulationWindow {
        min: settings.reconcile.min_population,
        max: settings.reconcile.max_population,
    };
    let reconciliation = reconcile(&inputs.tax.rows, &inputs.population.rows, window);
    log_report(&reconciliation.report);
    Ok((inputs, reconciliation))
}

fn log_report(r: &ReconcileReport) {
    log::info!(
        "reconciled {} cities from {} population rows",
        r.kept,
        r.population_rows
    );
    log::info!(
        "  dropped: {} unrecognised label, {} invalid number, {} out of range, {} duplicate, {} duplicate code",
        r.unrecognized_label,
        r.invalid_population,
        r.out_of_range,
        r.duplicates_collapsed,
        r.duplicate_codes,
    );
    if r.tax_without_population > 0 {
        log::warn!(
            "  {} tax-dataset cities have no usable population row and are left out",
            r.tax_without_population
        );
    }
    if r.duplicate_tax_names > 0 {
        log::warn!("  {} repeated names in the tax dataset; first row used", r.duplicate_tax_names);
    }
}

/// Built-in region aliases with the configured ones layered on top.
pub fn alias_table(settings: &Settings) -> AliasTable {
    let mut aliases = default_aliases();
    aliases.extend(
        settings
            .region_aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    aliases
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Enrich but do not commit.
    pub dry_run: bool,
    /// Process only the first N reconciled cities.
    pub limit: Option<usize>,
    pub cancel: CancelToken,
}

/// Operator summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub reconcile: ReconcileReport,
    pub candidates: usize,
    pub enriched: usize,
    pub geocode_misses: usize,
    pub features_defaulted: usize,
    pub fallback_regions: usize,
    pub unmatched_unemployment: usize,
    pub committed: usize,
}

/// Result of `locate`: one city resolved, classified and matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Located {
    pub location: ResolvedLocation,
    pub region: Option<ClassifiedRegion>,
    pub unemployment_rate: Option<f64>,
    pub unemployment_tier: Option<MatchTier>,
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    geocoder: Geocoder,
    counter: FeatureCounter,
    sleeper: Arc<dyn Sleeper>,
    aliases: AliasTable,
}

impl<'a> Pipeline<'a> {
    pub fn new(settings: &'a Settings, sleeper: Arc<dyn Sleeper>) -> Result<Self, PipelineError> {
        Ok(Self {
            settings,
            geocoder: Geocoder::new(settings, sleeper.clone())
                .map_err(|e| PipelineError::Client(e.to_string()))?,
            counter: FeatureCounter::new(settings, sleeper.clone())
                .map_err(|e| PipelineError::Client(e.to_string()))?,
            sleeper,
            aliases: alias_table(settings),
        })
    }

    /// Full batch. With `store` absent (or `dry_run`) nothing is written.
    /// Returns the summary and the enriched batch.
    pub fn run(
        &self,
        store: Option<&mut Store>,
        opts: &RunOptions,
    ) -> Result<(RunSummary, Vec<EnrichedCity>), PipelineError> {
        let (inputs, reconciliation) = load_and_reconcile(self.settings)?;
        self.run_loaded(&inputs, reconciliation, store, opts)
    }

    /// Batch over inputs already read by [`load_and_reconcile`]. Callers that
    /// open the store lazily do so between the two calls, so a bad input
    /// never creates a store file.
    pub fn run_loaded(
        &self,
        inputs: &InputSet,
        reconciliation: Reconciliation,
        store: Option<&mut Store>,
        opts: &RunOptions,
    ) -> Result<(RunSummary, Vec<EnrichedCity>), PipelineError> {
        let mut cities = reconciliation.cities;
        if let Some(limit) = opts.limit {
            cities.truncate(limit);
        }

        let mut summary = RunSummary {
            reconcile: reconciliation.report,
            candidates: cities.len(),
            ..Default::default()
        };

        let batch = self.enrich_all(&cities, &inputs.unemployment, &opts.cancel, &mut summary)?;
        summary.enriched = batch.len();

        match store {
            Some(store) if !opts.dry_run => {
                opts.cancel.check()?;
                summary.committed = store.commit(&batch, self.settings.data_year)?;
                log::info!("committed {} localities", summary.committed);
            }
            _ => log::info!("dry run: {} localities not committed", batch.len()),
        }

        log::info!(
            "done: {} candidates, {} enriched, {} not geocoded, {} features defaulted to 0, {} committed",
            summary.candidates,
            summary.enriched,
            summary.geocode_misses,
            summary.features_defaulted,
            summary.committed,
        );
        Ok((summary, batch))
    }

    /// Enrich every city in order, pausing between cities.
    pub fn enrich_all(
        &self,
        cities: &[ReconciledCity],
        rates: &UnemploymentTable,
        cancel: &CancelToken,
        summary: &mut RunSummary,
    ) -> Result<Vec<EnrichedCity>, Cancelled> {
        let pause = Duration::from_millis(self.settings.throttle.inter_city_pause_ms);
        let total = cities.len();
        let mut batch = Vec::with_capacity(total);

        for (i, city) in cities.iter().enumerate() {
            cancel.check()?;
            log::info!("[{}/{}] {} ({})", i + 1, total, city.name, city.oktmo);

            if let Some(enriched) = self.enrich(city, rates, cancel, summary)? {
                batch.push(enriched);
            }

            if i + 1 < total && !pause.is_zero() {
                self.sleeper.sleep(pause, cancel)?;
            }
        }
        Ok(batch)
    }

    fn enrich(
        &self,
        city: &ReconciledCity,
        rates: &UnemploymentTable,
        cancel: &CancelToken,
        summary: &mut RunSummary,
    ) -> Result<Option<EnrichedCity>, Cancelled> {
        let location = match self.geocoder.resolve(&city.name, None, cancel) {
            Ok(loc) => loc,
            Err(ResolveError::Cancelled) => return Err(Cancelled),
            Err(e) => {
                log::warn!("  not geocoded: {} ({})", city.name, e);
                summary.geocode_misses += 1;
                return Ok(None);
            }
        };

        let tally = self.counter.count_all(&location.area, cancel)?;
        summary.features_defaulted += tally.defaulted.len();

        let region = classify_region(&location.display_name);
        let rate = region
            .as_ref()
            .and_then(|r| match_unemployment(&r.label, rates, &self.aliases));

        match &region {
            Some(r) if r.tier == RegionTier::Fallback => {
                summary.fallback_regions += 1;
                log::warn!("  region '{}' taken from last place segment", r.label);
            }
            Some(r) => log::debug!("  region '{}' via {}", r.label, r.tier),
            None => log::warn!("  no region in '{}'", location.display_name),
        }
        match rate {
            Some((value, tier)) => log::debug!("  unemployment {} via {}", value, tier),
            None => summary.unmatched_unemployment += 1,
        }

        let counts = tally.counts;
        log::info!(
            "  schools={}, gas_stations={}, bus_stops={}, region='{}', unemployment={}",
            counts.schools,
            counts.gas_stations,
            counts.bus_stops,
            region.as_ref().map(|r| r.label.as_str()).unwrap_or(""),
            rate.map(|(v, _)| v.to_string()).unwrap_or_else(|| "-".into()),
        );

        Ok(Some(EnrichedCity {
            city: city.clone(),
            region,
            unemployment_rate: rate.map(|(v, _)| v),
            unemployment_tier: rate.map(|(_, t)| t),
            infrastructure: counts,
        }))
    }

    /// Resolve, classify and match a single city. Geocoding failures are returned.
    pub fn locate(
        &self,
        city: &str,
        region_hint: Option<&str>,
        rates: &UnemploymentTable,
        cancel: &CancelToken,
    ) -> Result<Located, ResolveError> {
        let location = self.geocoder.resolve(city, region_hint, cancel)?;
        let region = classify_region(&location.display_name);
        let rate = region
            .as_ref()
            .and_then(|r| match_unemployment(&r.label, rates, &self.aliases));
        Ok(Located {
            location,
            region,
            unemployment_rate: rate.map(|(v, _)| v),
            unemployment_tier: rate.map(|(_, t)| t),
        })
    }
}
