//! Cosmetic avatar timers: idle eye drift and periodic blinking.
//!
//! Runs as two background tasks that only publish eye position and blink
//! phase. The chat session never reads from here.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tutor_core::avatar::{AvatarFrame, BlinkPhase, EYE_DRIFT_X, EYE_DRIFT_Y, EyeOffset, frame_for};
use tutor_core::model::ActivityState;

#[derive(Debug, Clone, Copy)]
pub struct AnimationTiming {
    pub drift_every: Duration,
    /// A blink happens every `blink_min + rand(0..blink_jitter)`.
    pub blink_min: Duration,
    pub blink_jitter: Duration,
    pub blink_hold: Duration,
}

impl Default for AnimationTiming {
    fn default() -> Self {
        Self {
            drift_every: Duration::from_secs(2),
            blink_min: Duration::from_secs(3),
            blink_jitter: Duration::from_secs(2),
            blink_hold: Duration::from_millis(150),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeTimers {
    pub drift: EyeOffset,
    pub blink: BlinkPhase,
}

pub struct Animator {
    rx: watch::Receiver<EyeTimers>,
    tasks: Vec<JoinHandle<()>>,
}

impl Animator {
    /// Must be called from within a tokio runtime.
    pub fn spawn(timing: AnimationTiming) -> Self {
        let (tx, rx) = watch::channel(EyeTimers::default());

        let drift_tx = tx.clone();
        let drift = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timing.drift_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let offset = random_drift();
                drift_tx.send_modify(|t| t.drift = offset);
            }
        });

        let blink = tokio::spawn(async move {
            loop {
                tokio::time::sleep(blink_delay(&timing)).await;
                tx.send_modify(|t| t.blink = BlinkPhase::Closed);
                tokio::time::sleep(timing.blink_hold).await;
                tx.send_modify(|t| t.blink = BlinkPhase::Open);
            }
        });

        Self {
            rx,
            tasks: vec![drift, blink],
        }
    }

    pub fn timers(&self) -> EyeTimers {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EyeTimers> {
        self.rx.clone()
    }

    pub fn frame(&self, state: ActivityState) -> AvatarFrame {
        let timers = self.timers();
        frame_for(state, timers.drift, timers.blink)
    }
}

impl Drop for Animator {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn random_drift() -> EyeOffset {
    let mut rng = rand::thread_rng();
    EyeOffset {
        x: rng.gen_range(-EYE_DRIFT_X..=EYE_DRIFT_X),
        y: rng.gen_range(-EYE_DRIFT_Y..=EYE_DRIFT_Y),
    }
}

fn blink_delay(timing: &AnimationTiming) -> Duration {
    let jitter_ms = timing.blink_jitter.as_millis() as u64;
    let extra = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_ms)
    };
    timing.blink_min + Duration::from_millis(extra)
}
