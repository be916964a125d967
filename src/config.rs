use crate::enums::Convention;

/// Thresholds used by the geometry validator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeometryTolerances {
    /// Direction cosine dot products and norms beyond this fail validation.
    pub orientation_hard: f64,
    /// Direction cosine deviations beyond this only warn.
    pub orientation_soft: f64,
    /// Relative step deviation from which slices are considered missing.
    pub missing_slice: f64,
    /// Relative step deviation from which the spacing is reported as non-uniform.
    pub spacing_warning: f64,
}

impl Default for GeometryTolerances {
    fn default() -> Self {
        Self {
            orientation_hard: 1e-4,
            orientation_soft: 1e-8,
            missing_slice: 0.1,
            spacing_warning: 1e-5,
        }
    }
}

/// Options of a processing run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StitchConfig {
    /// Number of series reconstructed concurrently.
    pub workers: usize,
    /// Reconstructed series kept in memory before further ones are dropped.
    pub max_kept_results: usize,
    /// Keep reconstructed series at all; when false only the summary is produced.
    pub keep_results: bool,
    /// Convention every published volume is converted to.
    pub target_convention: Convention,
    pub tolerances: GeometryTolerances,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_kept_results: 10,
            keep_results: true,
            target_convention: Convention::Lps,
            tolerances: GeometryTolerances::default(),
        }
    }
}

impl StitchConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_kept_results(mut self, max_kept_results: usize) -> Self {
        self.max_kept_results = max_kept_results;
        self
    }

    pub fn with_keep_results(mut self, keep_results: bool) -> Self {
        self.keep_results = keep_results;
        self
    }

    pub fn with_target_convention(mut self, convention: Convention) -> Self {
        self.target_convention = convention;
        self
    }

    pub fn with_tolerances(mut self, tolerances: GeometryTolerances) -> Self {
        self.tolerances = tolerances;
        self
    }
}
