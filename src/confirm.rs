//! # Reset-Base Confirmation Module
//!
//! Questo modulo implementa la conferma in due passi davanti a `/ResetBase`,
//! che non si può annullare.
//!
//! ## Stati:
//! - `Locked`: il countdown è ancora in corso (5 tick da un secondo di default)
//! - `AwaitingAcknowledgement`: countdown finito, manca la presa visione
//! - `Unlocked`: countdown finito e presa visione data; la conferma riesce
//!
//! ## Presa visione memorizzata:
//! La presa visione si può dare o ritirare in qualsiasi momento e viene
//! ricordata. Durante il countdown non ha effetto; il gate si sblocca al tick
//! che arriva a zero se in quel momento è attiva.
//!
//! ## Esito:
//! Un solo bool. Annullare, chiudere l'input o una richiesta di cancellazione
//! in qualsiasi momento danno `false`.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Observable state of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Locked { seconds_remaining: u32 },
    AwaitingAcknowledgement,
    Unlocked,
}

#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    seconds_remaining: u32,
    acknowledged: bool,
}

impl ConfirmationGate {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            seconds_remaining: countdown_secs,
            acknowledged: false,
        }
    }

    /// One second of countdown elapsed
    pub fn tick(&mut self) -> GateState {
        self.seconds_remaining = self.seconds_remaining.saturating_sub(1);
        self.state()
    }

    pub fn set_acknowledged(&mut self, acknowledged: bool) -> GateState {
        self.acknowledged = acknowledged;
        self.state()
    }

    pub fn toggle_acknowledged(&mut self) -> GateState {
        self.set_acknowledged(!self.acknowledged)
    }

    pub fn seconds_remaining(&self) -> u32 {
        self.seconds_remaining
    }

    pub fn countdown_done(&self) -> bool {
        self.seconds_remaining == 0
    }

    pub fn is_unlocked(&self) -> bool {
        self.countdown_done() && self.acknowledged
    }

    pub fn state(&self) -> GateState {
        if !self.countdown_done() {
            GateState::Locked {
                seconds_remaining: self.seconds_remaining,
            }
        } else if self.acknowledged {
            GateState::Unlocked
        } else {
            GateState::AwaitingAcknowledgement
        }
    }
}

/// User input delivered to the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmInput {
    Acknowledge(bool),
    Toggle,
    Confirm,
    Cancel,
}

impl ConfirmInput {
    /// Map a line typed at the terminal: `y`/`n` set the acknowledgement,
    /// an empty line confirms, `q` cancels
    pub fn from_line(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Self::Acknowledge(true)),
            "n" | "no" => Some(Self::Acknowledge(false)),
            "t" | "toggle" => Some(Self::Toggle),
            "" | "c" | "confirm" => Some(Self::Confirm),
            "q" | "quit" | "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Drives a `ConfirmationGate` from a one-second clock and user input
#[derive(Debug)]
pub struct ConfirmationPrompt {
    gate: ConfirmationGate,
    tick: Duration,
    auto_confirm: bool,
}

impl ConfirmationPrompt {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            gate: ConfirmationGate::new(countdown_secs),
            tick: Duration::from_secs(1),
            auto_confirm: false,
        }
    }

    /// Confirm by itself as soon as the gate unlocks
    pub fn auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    /// Acknowledge up front (the latch still waits for the countdown)
    pub fn acknowledged(mut self, acknowledged: bool) -> Self {
        self.gate.set_acknowledged(acknowledged);
        self
    }

    /// Run until confirmed (`true`) or cancelled/closed (`false`).
    ///
    /// `on_change` sees the gate after every tick and every input.
    pub async fn run<F>(
        mut self,
        mut inputs: mpsc::Receiver<ConfirmInput>,
        cancel: &CancellationToken,
        mut on_change: F,
    ) -> bool
    where
        F: FnMut(&ConfirmationGate),
    {
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        on_change(&self.gate);

        loop {
            if self.auto_confirm && self.gate.is_unlocked() {
                debug!("Reset-base confirmation unlocked and auto-confirmed");
                return true;
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = ticker.tick(), if !self.gate.countdown_done() => {
                    self.gate.tick();
                    on_change(&self.gate);
                }
                input = inputs.recv() => {
                    match input {
                        None | Some(ConfirmInput::Cancel) => {
                            debug!("Reset-base confirmation cancelled");
                            return false;
                        }
                        Some(ConfirmInput::Confirm) if self.gate.is_unlocked() => return true,
                        Some(ConfirmInput::Confirm) => {}
                        Some(ConfirmInput::Acknowledge(value)) => {
                            self.gate.set_acknowledged(value);
                        }
                        Some(ConfirmInput::Toggle) => {
                            self.gate.toggle_acknowledged();
                        }
                    }
                    on_change(&self.gate);
                }
            }
        }
    }
}
