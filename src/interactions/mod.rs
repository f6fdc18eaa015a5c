pub mod reconciler;
pub mod state;

pub use reconciler::{
    AuthoritativeUpdate, InteractionError, InteractionEvent, InteractionReconciler, ToggleOutcome,
};
pub use state::{flip, Admission, OptimisticMutation, PendingMutations};
