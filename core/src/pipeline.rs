//! Pipeline wiring: validate → features → {rules | model} → decision.
//!
//! One `RiskPipeline` per process/store. Capabilities are probed once at
//! construction and the matching history strategy is selected there;
//! each request after that is independent and read-only, so concurrent
//! scoring needs no locking beyond the model handle's snapshot.

use crate::{
    capability::CapabilitySet,
    config::RiskConfig,
    decision::{self, RiskAssessment},
    error::RiskResult,
    features::FeatureBuilder,
    history::{self, HistoryReader},
    model::{self, ModelArtifact, ModelHandle, TrainReport},
    rules,
    store::LedgerStore,
    transaction::TxRequest,
};

pub struct RiskPipeline {
    store: LedgerStore,
    caps: CapabilitySet,
    reader: Box<dyn HistoryReader>,
    config: RiskConfig,
    model: ModelHandle,
}

impl RiskPipeline {
    /// Probe the ledger schema and wire up the matching query strategy.
    /// Fails fast if the metadata read fails.
    pub fn new(store: LedgerStore, config: RiskConfig) -> RiskResult<Self> {
        let caps = CapabilitySet::detect(&store)?;
        let reader = history::select_reader(&caps);
        Ok(Self {
            store,
            caps,
            reader,
            config,
            model: ModelHandle::new(),
        })
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.caps
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Re-probe after a schema change (e.g. the extended migration ran
    /// while the process was up).
    pub fn refresh_capabilities(&mut self) -> RiskResult<()> {
        self.caps = CapabilitySet::detect(&self.store)?;
        self.reader = history::select_reader(&self.caps);
        Ok(())
    }

    /// Rule-based scoring path.
    pub fn score(&self, request: &TxRequest) -> RiskResult<RiskAssessment> {
        let tx = request.validate()?;
        let builder = FeatureBuilder::new(&self.store, self.reader.as_ref(), &self.config);
        let features = builder.build(&tx)?;
        let (hits, risk_score) = rules::evaluate(&features, &self.config);
        let assessment = decision::decide(&tx, &features, self.caps, &hits, risk_score, &self.config);
        log::info!(
            "scored txn source={} amount={} decision={:?} score={} hits=[{}]",
            tx.source_id,
            tx.amount,
            assessment.decision,
            assessment.risk_score,
            assessment.rule_hits.join(",")
        );
        Ok(assessment)
    }

    /// Model-based scoring path, independent of the rule engine.
    /// Yields a conservative "review" if no artifact is installed.
    pub fn score_with_model(&self, request: &TxRequest) -> RiskResult<RiskAssessment> {
        let tx = request.validate()?;
        let artifact = match self.model.snapshot() {
            Some(a) => a,
            None => {
                log::warn!("model scoring requested before any artifact was trained");
                return Ok(RiskAssessment::model_not_trained());
            }
        };
        let builder = FeatureBuilder::new(&self.store, self.reader.as_ref(), &self.config);
        let features = builder.build(&tx)?;
        let input = model::model_input(&features, &self.config);
        let anomaly_score = artifact.score_vector(&input);
        let assessment = decision::decide_from_model_score(
            &tx,
            &features,
            self.caps,
            anomaly_score,
            &artifact.artifact_id,
            &self.config,
        );
        log::info!(
            "model-scored txn source={} amount={} decision={:?} score={}",
            tx.source_id,
            tx.amount,
            assessment.decision,
            assessment.risk_score
        );
        Ok(assessment)
    }

    /// Install an externally trained/loaded artifact (atomic swap).
    pub fn install_artifact(&self, artifact: ModelArtifact) {
        self.model.install(artifact);
    }

    pub fn artifact_installed(&self) -> bool {
        self.model.snapshot().is_some()
    }

    /// Train a fresh artifact over the trailing window of the ledger and
    /// install it atomically. The as-of point is the newest ledger row,
    /// so repeated runs over an unchanged ledger are reproducible.
    pub fn train_model(
        &self,
        window_days: u32,
        contamination: f64,
    ) -> RiskResult<(TrainReport, ModelArtifact)> {
        let as_of = self
            .reader
            .latest_timestamp(&self.store)?
            .ok_or(crate::error::RiskError::EmptyTrainingWindow { window_days })?;
        let rows = self.reader.window_rows(&self.store, as_of, window_days)?;
        log::info!(
            "training anomaly model: window_days={} contamination={} rows={}",
            window_days,
            contamination,
            rows.len()
        );
        let artifact = model::train(&rows, window_days, contamination, &self.config)?;
        let report = TrainReport {
            ok: true,
            sample_count: artifact.sample_count,
            feature_names: artifact.feature_names.clone(),
        };
        self.model.install(artifact.clone());
        Ok((report, artifact))
    }
}
