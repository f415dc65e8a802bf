//! CreatePost saga state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The state of a CreatePost saga.
///
/// State transitions:
/// ```text
/// init ──CreateRoom──► CreatingRoom ──┬──ApprovePost──► PostApproved
///                                     └──RejectPost───► PostRejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CreatePostSagaState {
    /// Saga exists only in memory; nothing is persisted yet.
    #[default]
    #[serde(rename = "init")]
    Init,

    /// Waiting for the room service to answer.
    CreatingRoom,

    /// Room created, post published (terminal state).
    PostApproved,

    /// Room creation failed, post deleted (terminal state).
    PostRejected,
}

impl CreatePostSagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CreatePostSagaState::PostApproved | CreatePostSagaState::PostRejected
        )
    }

    /// Returns the state name as persisted in `saga_instance.current_state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CreatePostSagaState::Init => "init",
            CreatePostSagaState::CreatingRoom => "CreatingRoom",
            CreatePostSagaState::PostApproved => "PostApproved",
            CreatePostSagaState::PostRejected => "PostRejected",
        }
    }
}

impl std::fmt::Display for CreatePostSagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CreatePostSagaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(CreatePostSagaState::Init),
            "CreatingRoom" => Ok(CreatePostSagaState::CreatingRoom),
            "PostApproved" => Ok(CreatePostSagaState::PostApproved),
            "PostRejected" => Ok(CreatePostSagaState::PostRejected),
            other => Err(other.to_string()),
        }
    }
}

/// Events that drive a CreatePost saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaEvent {
    /// Ask the room service for a chat room.
    CreateRoom,

    /// The room exists; publish the post.
    ApprovePost,

    /// The room could not be created; withdraw the post.
    RejectPost,
}

impl SagaEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaEvent::CreateRoom => "CreateRoom",
            SagaEvent::ApprovePost => "ApprovePost",
            SagaEvent::RejectPost => "RejectPost",
        }
    }
}

impl std::fmt::Display for SagaEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work committed together with a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Insert the saga instance and emit `create.room`.
    RequestRoom,

    /// Update the saga instance and emit `post.approved`.
    ApprovePost,

    /// Delete the post, update the saga instance and emit `post.rejected`.
    CompensatePost,
}

impl SideEffect {
    /// Returns true if the side effect undoes earlier work.
    pub fn is_compensation(&self) -> bool {
        matches!(self, SideEffect::CompensatePost)
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event: SagaEvent,
    pub src: CreatePostSagaState,
    pub dst: CreatePostSagaState,
    pub side_effect: SideEffect,
}

/// Every transition the saga allows. Anything not listed is rejected.
pub const TRANSITIONS: [Transition; 3] = [
    Transition {
        event: SagaEvent::CreateRoom,
        src: CreatePostSagaState::Init,
        dst: CreatePostSagaState::CreatingRoom,
        side_effect: SideEffect::RequestRoom,
    },
    Transition {
        event: SagaEvent::ApprovePost,
        src: CreatePostSagaState::CreatingRoom,
        dst: CreatePostSagaState::PostApproved,
        side_effect: SideEffect::ApprovePost,
    },
    Transition {
        event: SagaEvent::RejectPost,
        src: CreatePostSagaState::CreatingRoom,
        dst: CreatePostSagaState::PostRejected,
        side_effect: SideEffect::CompensatePost,
    },
];

/// Looks up the transition for `event` fired in state `src`.
pub fn transition(event: SagaEvent, src: CreatePostSagaState) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.event == event && t.src == src)
}
