//! Stage transitions of one RedisFailover check/heal pass.
//!
//! A pass walks the stages in a fixed order:
//!
//! Validating → WaitingPods → WaitingSentinels → Electing → Repointing →
//! ConfigSyncing → ArbiterSyncing → Ready
//!
//! `Failed` is reachable from every stage except the two waiting stages.
//! Those loop back onto themselves instead; the pass ends there and the
//! resource is requeued after a short delay.

use std::fmt;

use crate::crd::FailoverPhase;

/// Stage of a check/heal pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HealStage {
    Validating,
    WaitingPods,
    WaitingSentinels,
    Electing,
    Repointing,
    ConfigSyncing,
    ArbiterSyncing,
    Ready,
    Failed,
}

impl HealStage {
    /// Whether the pass ends in this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, HealStage::Ready | HealStage::Failed)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, HealStage::WaitingPods | HealStage::WaitingSentinels)
    }

    /// Status phase a pass ending in this stage reports
    pub fn phase(&self) -> FailoverPhase {
        match self {
            HealStage::WaitingPods | HealStage::WaitingSentinels => FailoverPhase::WaitingPodReady,
            HealStage::Ready => FailoverPhase::Ready,
            HealStage::Failed => FailoverPhase::Fail,
            _ => FailoverPhase::Pending,
        }
    }
}

impl fmt::Display for HealStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealStage::Validating => write!(f, "Validating"),
            HealStage::WaitingPods => write!(f, "WaitingPods"),
            HealStage::WaitingSentinels => write!(f, "WaitingSentinels"),
            HealStage::Electing => write!(f, "Electing"),
            HealStage::Repointing => write!(f, "Repointing"),
            HealStage::ConfigSyncing => write!(f, "ConfigSyncing"),
            HealStage::ArbiterSyncing => write!(f, "ArbiterSyncing"),
            HealStage::Ready => write!(f, "Ready"),
            HealStage::Failed => write!(f, "Failed"),
        }
    }
}

/// What happened in the current stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HealEvent {
    /// The stage's invariant holds, possibly after a corrective action
    Passed,
    /// Pods are still converging
    StillWaiting,
    /// The stage's invariant could not be restored
    Errored,
}

impl fmt::Display for HealEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealEvent::Passed => write!(f, "Passed"),
            HealEvent::StillWaiting => write!(f, "StillWaiting"),
            HealEvent::Errored => write!(f, "Errored"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: HealStage,
    pub to: HealStage,
    pub event: HealEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: HealStage,
        to: HealStage,
        event: HealEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: HealStage,
        to: HealStage,
        description: &'static str,
    },
    InvalidTransition {
        current: HealStage,
        event: HealEvent,
    },
}

/// Transition table of a check/heal pass
pub struct HealStateMachine {
    transitions: Vec<Transition>,
}

impl Default for HealStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HealStateMachine {
    pub fn new() -> Self {
        use HealEvent::*;
        use HealStage::*;

        Self {
            transitions: vec![
                Transition::new(Validating, WaitingPods, Passed, "Spec accepted"),
                Transition::new(Validating, Failed, Errored, "Spec rejected"),
                Transition::new(WaitingPods, WaitingSentinels, Passed, "All redis pods ready"),
                Transition::new(WaitingPods, WaitingPods, StillWaiting, "Redis pods converging"),
                Transition::new(WaitingSentinels, Electing, Passed, "All sentinel pods ready"),
                Transition::new(
                    WaitingSentinels,
                    WaitingSentinels,
                    StillWaiting,
                    "Sentinel pods converging",
                ),
                Transition::new(Electing, Repointing, Passed, "Exactly one master"),
                Transition::new(Electing, Failed, Errored, "Master could not be established"),
                Transition::new(Repointing, ConfigSyncing, Passed, "Replicas follow the master"),
                Transition::new(Repointing, Failed, Errored, "Replicas could not be re-pointed"),
                Transition::new(ConfigSyncing, ArbiterSyncing, Passed, "Redis config in sync"),
                Transition::new(ConfigSyncing, Failed, Errored, "Redis config drift remains"),
                Transition::new(ArbiterSyncing, Ready, Passed, "Sentinels in sync"),
                Transition::new(ArbiterSyncing, Failed, Errored, "Sentinels could not be repaired"),
            ],
        }
    }

    pub fn transition(&self, current: HealStage, event: HealEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: HealStage, event: HealEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Events accepted in `stage`
    pub fn valid_events(&self, stage: HealStage) -> Vec<HealEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == stage)
            .map(|t| t.event)
            .collect()
    }
}
