mod playbook;
mod status;

pub use playbook::{BackendType, Playbook, Query, Step, Target, Variables};
pub use status::{
    QueryStatus, ReadyQuery, ReadyStep, ResultTable, StepStatus, TargetError, TargetStatus,
};
