//! Session states and the transition function.
//!
//! The transition function is pure: the driver performs the I/O for the
//! current state, turns the outcome into an [`Event`] and applies the
//! returned [`Effect`].

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Modem,
    Dial,
    Link,
    Association,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Modem => "modem initialisation",
            Self::Dial => "dialing",
            Self::Link => "link establishment",
            Self::Association => "association",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ModemDisconnected { attempts: u32 },
    ModemDialing { attempts: u32 },
    LinkPending { attempts: u32 },
    AssociationPending,
    /// Reading objects; `next_object` indexes the object list.
    Associated { next_object: usize },
    Failed(FailureStage),
}

impl SessionState {
    pub fn initial(with_modem: bool) -> Self {
        if with_modem {
            Self::ModemDisconnected { attempts: 0 }
        } else {
            Self::LinkPending { attempts: 0 }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ModemReady,
    ModemFailed,
    Dialed,
    DialFailed,
    LinkEstablished,
    LinkFailed,
    AssociationAccepted,
    AssociationFailed,
    ObjectDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Move to the next physical address and start over.
    ScanNextAddress,
    Fatal(FailureStage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts tolerated before escalating; `retries + 1` attempts
    /// are made in total.
    pub retries: u32,
    pub scan_address: bool,
}

fn retry<F>(
    attempts: u32,
    policy: &RetryPolicy,
    stay: F,
    stage: FailureStage,
    scan: bool,
) -> (SessionState, Option<Effect>)
where
    F: Fn(u32) -> SessionState,
{
    let attempts = attempts + 1;
    if attempts <= policy.retries {
        (stay(attempts), None)
    } else if scan {
        (stay(0), Some(Effect::ScanNextAddress))
    } else {
        (SessionState::Failed(stage), Some(Effect::Fatal(stage)))
    }
}

pub fn transition(
    state: SessionState,
    event: Event,
    policy: &RetryPolicy,
) -> (SessionState, Option<Effect>) {
    use SessionState::*;

    match (state, event) {
        (ModemDisconnected { .. }, Event::ModemReady) => (ModemDialing { attempts: 0 }, None),
        (ModemDisconnected { attempts }, Event::ModemFailed) => retry(
            attempts,
            policy,
            |attempts| ModemDisconnected { attempts },
            FailureStage::Modem,
            false,
        ),
        (ModemDialing { .. }, Event::Dialed) => (LinkPending { attempts: 0 }, None),
        (ModemDialing { attempts }, Event::DialFailed) => retry(
            attempts,
            policy,
            |attempts| ModemDialing { attempts },
            FailureStage::Dial,
            false,
        ),
        (LinkPending { .. }, Event::LinkEstablished) => (AssociationPending, None),
        (LinkPending { attempts }, Event::LinkFailed) => retry(
            attempts,
            policy,
            |attempts| LinkPending { attempts },
            FailureStage::Link,
            policy.scan_address,
        ),
        (AssociationPending, Event::AssociationAccepted) => (Associated { next_object: 0 }, None),
        (AssociationPending, Event::AssociationFailed) => (
            Failed(FailureStage::Association),
            Some(Effect::Fatal(FailureStage::Association)),
        ),
        (Associated { next_object }, Event::ObjectDone) => {
            (Associated { next_object: next_object + 1 }, None)
        }
        // Events that do not belong to the current state change nothing
        (state, _) => (state, None),
    }
}
