//! Pipeline topology: stage configurations and the routing table.
//!
//! The testbed firmware addressed stages through id-valued macros and a
//! giant per-id
//! branch; here the links are explicit data, validated once, and every
//! controller is parameterized by its own `StageConfig`.

use crate::error::{PipelineError, Result};
use meshpipe_proto::{AcceleratorId, ClusterId, StageId};

/// Configuration of one pipeline stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage identity.
    pub stage: StageId,
    /// The cluster this stage runs on.
    pub cluster: ClusterId,
    /// The accelerator bound to this stage (one per stage; a cluster with
    /// several accelerators runs several controllers).
    pub accelerator: AcceleratorId,
    /// Ring depth for input tiles and output images (1 = single buffering,
    /// 2 = double buffering, up to 4).
    pub buffer_depth: usize,
    /// Tiles per image for this job.
    pub tiles_per_image: u64,
    /// The producing cluster, if this is not the first stage.
    pub upstream: Option<ClusterId>,
    /// The consuming cluster, if this is not the last stage.
    pub downstream: Option<ClusterId>,
    /// For the master's stage only: the tail cluster whose staging
    /// notifications (`DMA_OUT_START`/`DMA_OUT_TERMINATE`) it observes.
    pub staging_feed: Option<ClusterId>,
}

impl StageConfig {
    /// Whether this stage writes to the external staging area.
    pub fn is_tail(&self) -> bool {
        self.downstream.is_none()
    }

    /// Whether this stage pulls from the external source.
    pub fn is_head(&self) -> bool {
        self.upstream.is_none()
    }
}

/// A validated linear pipeline: stage `i` feeds stage `i + 1`.
#[derive(Debug, Clone)]
pub struct Topology {
    stages: Vec<StageConfig>,
}

impl Topology {
    /// Maximum supported ring depth.
    pub const MAX_DEPTH: usize = 4;

    /// Build a linear chain of `stage_count` stages, stage `i` on cluster
    /// `i` with accelerator `i`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BadTopology`] for zero stages, a depth outside
    /// `1..=4`, or zero tiles per image.
    pub fn linear(stage_count: usize, buffer_depth: usize, tiles_per_image: u64) -> Result<Self> {
        if stage_count == 0 {
            return Err(PipelineError::topology("no stages"));
        }
        let last = stage_count - 1;
        let stages = (0..stage_count)
            .map(|i| {
                let idx = u32::try_from(i).map_err(|_| {
                    PipelineError::topology(format!("stage index {i} out of range"))
                })?;
                Ok(StageConfig {
                    stage: StageId(idx),
                    cluster: ClusterId(idx),
                    accelerator: AcceleratorId(idx),
                    buffer_depth,
                    tiles_per_image,
                    upstream: (i > 0).then(|| ClusterId(idx - 1)),
                    downstream: (i < last).then(|| ClusterId(idx + 1)),
                    staging_feed: (i == 0)
                        .then(|| ClusterId(u32::try_from(last).unwrap_or(0))),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let topo = Self { stages };
        topo.validate()?;
        Ok(topo)
    }

    /// The stage configurations, in stage order.
    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    /// Number of stages (= clusters for a linear chain).
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of clusters the fabric needs.
    pub fn cluster_count(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.cluster.index() + 1)
            .max()
            .unwrap_or(0)
    }

    /// The last stage (writes to the staging area).
    pub fn tail(&self) -> &StageConfig {
        // A validated topology is never empty.
        &self.stages[self.stages.len() - 1]
    }

    /// Check structural invariants: contiguous unique clusters, chain
    /// links that agree in both directions, sane depths.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BadTopology`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PipelineError::topology("no stages"));
        }
        for (i, cfg) in self.stages.iter().enumerate() {
            if cfg.buffer_depth == 0 || cfg.buffer_depth > Self::MAX_DEPTH {
                return Err(PipelineError::topology(format!(
                    "{}: buffer depth {} outside 1..={}",
                    cfg.stage,
                    cfg.buffer_depth,
                    Self::MAX_DEPTH
                )));
            }
            if cfg.tiles_per_image == 0 {
                return Err(PipelineError::topology(format!(
                    "{}: zero tiles per image",
                    cfg.stage
                )));
            }
            if cfg.stage.index() != i || cfg.cluster.index() != i {
                return Err(PipelineError::topology(format!(
                    "{}: stage/cluster ids must be contiguous from zero",
                    cfg.stage
                )));
            }
            let expect_up = (i > 0).then(|| self.stages[i - 1].cluster);
            if cfg.upstream != expect_up {
                return Err(PipelineError::topology(format!(
                    "{}: upstream link {:?} does not match chain",
                    cfg.stage, cfg.upstream
                )));
            }
            let expect_down = (i + 1 < self.stages.len()).then(|| self.stages[i + 1].cluster);
            if cfg.downstream != expect_down {
                return Err(PipelineError::topology(format!(
                    "{}: downstream link {:?} does not match chain",
                    cfg.stage, cfg.downstream
                )));
            }
            let expect_feed = (i == 0).then(|| self.tail().cluster);
            if cfg.staging_feed != expect_feed {
                return Err(PipelineError::topology(format!(
                    "{}: staging feed {:?} must be the tail cluster on the \
                     master stage and absent elsewhere",
                    cfg.stage, cfg.staging_feed
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_links() {
        let topo = Topology::linear(3, 2, 4).unwrap();
        assert_eq!(topo.cluster_count(), 3);
        let s = topo.stages();
        assert!(s[0].is_head() && !s[0].is_tail());
        assert_eq!(s[0].downstream, Some(ClusterId(1)));
        assert_eq!(s[1].upstream, Some(ClusterId(0)));
        assert_eq!(s[1].downstream, Some(ClusterId(2)));
        assert!(s[2].is_tail());
        assert_eq!(s[0].staging_feed, Some(ClusterId(2)));
        assert_eq!(s[1].staging_feed, None);
    }

    #[test]
    fn single_stage_is_head_and_tail() {
        let topo = Topology::linear(1, 2, 4).unwrap();
        let s = &topo.stages()[0];
        assert!(s.is_head() && s.is_tail());
        // The master observes its own staging notifications.
        assert_eq!(s.staging_feed, Some(ClusterId(0)));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(Topology::linear(0, 2, 4).is_err());
        assert!(Topology::linear(2, 0, 4).is_err());
        assert!(Topology::linear(2, 5, 4).is_err());
        assert!(Topology::linear(2, 2, 0).is_err());
    }

    #[test]
    fn broken_link_fails_validation() {
        let mut topo = Topology::linear(2, 2, 4).unwrap();
        topo.stages[1].upstream = None;
        assert!(topo.validate().is_err());
    }
}
