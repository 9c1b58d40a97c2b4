// =============================================================================
// Learning Module
// =============================================================================
//
// - Online regime-conditioned weight learner
// - Feedback queue fanning decision outcomes out to learner and registry

pub mod feedback;
pub mod weight_learner;

pub use feedback::{
    apply_outcome, feedback_channel, run_feedback_worker, FeedbackSender, FeedbackSummary,
    OutcomeReport,
};
pub use weight_learner::{ComponentLearning, LearningError, WeightEstimate, WeightLearner, WeightUpdate};
