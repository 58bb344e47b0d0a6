//! State enums are stored as short uppercase strings. Parsing rejects
//! unknown strings; formatting emits an "UNKNOWN" sentinel for unspecified
//! inputs, which no parser will accept back.

use super::MetaStoreError;
use crate::pb::flex::{FlexletState, JobState};

pub fn format_job_state(state: JobState) -> &'static str {
    match state {
        JobState::Pending => "PENDING",
        JobState::Running => "RUNNING",
        JobState::Finished => "FINISHED",
        JobState::Unspecified => "UNKNOWN",
    }
}

pub fn parse_job_state(s: &str) -> Result<JobState, MetaStoreError> {
    match s {
        "PENDING" => Ok(JobState::Pending),
        "RUNNING" => Ok(JobState::Running),
        "FINISHED" => Ok(JobState::Finished),
        other => Err(MetaStoreError::UnknownJobState(other.to_string())),
    }
}

pub fn format_flexlet_state(state: FlexletState) -> &'static str {
    match state {
        FlexletState::Online => "ONLINE",
        FlexletState::Offline => "OFFLINE",
        FlexletState::Unspecified => "UNKNOWN",
    }
}

pub fn parse_flexlet_state(s: &str) -> Result<FlexletState, MetaStoreError> {
    match s {
        "ONLINE" => Ok(FlexletState::Online),
        "OFFLINE" => Ok(FlexletState::Offline),
        other => Err(MetaStoreError::UnknownFlexletState(other.to_string())),
    }
}
