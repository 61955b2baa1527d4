//! Activity state to avatar geometry.
//!
//! Everything here is a pure lookup. Timing (eye drift, blinking) lives with
//! whatever renders the avatar and only feeds [`EyeOffset`] / [`BlinkPhase`]
//! into [`frame_for`].

use crate::model::ActivityState;

/// Eye drift bounds, in SVG user units of the 100x100 viewBox.
pub const EYE_DRIFT_X: f32 = 2.0;
pub const EYE_DRIFT_Y: f32 = 1.5;

pub const EYE_OPEN_HEIGHT: f32 = 6.0;
pub const EYE_CLOSED_HEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EyeOffset {
    pub x: f32,
    pub y: f32,
}

impl EyeOffset {
    pub const CENTER: EyeOffset = EyeOffset { x: 0.0, y: 0.0 };

    /// Clamp into the drift box.
    pub fn clamped(self) -> Self {
        Self {
            x: self.x.clamp(-EYE_DRIFT_X, EYE_DRIFT_X),
            y: self.y.clamp(-EYE_DRIFT_Y, EYE_DRIFT_Y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlinkPhase {
    #[default]
    Open,
    Closed,
}

impl BlinkPhase {
    pub fn eye_height(self) -> f32 {
        match self {
            BlinkPhase::Open => EYE_OPEN_HEIGHT,
            BlinkPhase::Closed => EYE_CLOSED_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouthShape {
    SlightSmile,
    Open,
    Neutral,
    WideSmile,
}

impl MouthShape {
    pub fn for_state(state: ActivityState) -> Self {
        match state {
            ActivityState::Idle => MouthShape::SlightSmile,
            ActivityState::Listening => MouthShape::Open,
            ActivityState::Thinking => MouthShape::Neutral,
            ActivityState::Responding => MouthShape::WideSmile,
        }
    }

    pub fn svg_path(self) -> &'static str {
        match self {
            MouthShape::SlightSmile => "M 40 62 Q 50 66 60 62",
            MouthShape::Open => "M 40 62 Q 50 58 60 62",
            MouthShape::Neutral => "M 40 60 L 60 60",
            MouthShape::WideSmile => "M 40 58 Q 50 65 60 58",
        }
    }

    pub fn glyph(self) -> char {
        match self {
            MouthShape::SlightSmile => '‿',
            MouthShape::Open => 'o',
            MouthShape::Neutral => '-',
            MouthShape::WideSmile => '◡',
        }
    }

    /// Shapes cycled while the state is shown. Responding "talks" by
    /// alternating with the resting smile.
    pub fn keyframes(state: ActivityState) -> &'static [MouthShape] {
        match state {
            ActivityState::Responding => &[
                MouthShape::WideSmile,
                MouthShape::SlightSmile,
                MouthShape::WideSmile,
            ],
            ActivityState::Idle => &[MouthShape::SlightSmile],
            ActivityState::Listening => &[MouthShape::Open],
            ActivityState::Thinking => &[MouthShape::Neutral],
        }
    }
}

/// Everything needed to draw one avatar frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarFrame {
    pub state: ActivityState,
    pub eye_offset: EyeOffset,
    pub blink_phase: BlinkPhase,
    pub mouth_shape: MouthShape,
}

/// Map an activity state plus the current cosmetic timers onto a frame.
///
/// Eyes only wander while idle; any active state looks straight ahead.
pub fn frame_for(state: ActivityState, drift: EyeOffset, blink: BlinkPhase) -> AvatarFrame {
    let eye_offset = match state {
        ActivityState::Idle => drift.clamped(),
        _ => EyeOffset::CENTER,
    };
    AvatarFrame {
        state,
        eye_offset,
        blink_phase: blink,
        mouth_shape: MouthShape::for_state(state),
    }
}

impl AvatarFrame {
    /// The same frame with the mouth at step `tick` of its state's keyframes.
    pub fn at_keyframe(mut self, tick: usize) -> Self {
        let frames = MouthShape::keyframes(self.state);
        if let Some(shape) = frames.get(tick % frames.len().max(1)) {
            self.mouth_shape = *shape;
        }
        self
    }

    /// One-line terminal face, e.g. `(o o) ‿`.
    pub fn glyph(&self) -> String {
        let eye = match self.blink_phase {
            BlinkPhase::Closed => '-',
            BlinkPhase::Open if self.eye_offset.y <= -EYE_DRIFT_Y / 2.0 => '°',
            BlinkPhase::Open if self.eye_offset.y >= EYE_DRIFT_Y / 2.0 => '.',
            BlinkPhase::Open => 'o',
        };
        let pad = if self.eye_offset.x <= -EYE_DRIFT_X / 2.0 {
            ("", " ")
        } else if self.eye_offset.x >= EYE_DRIFT_X / 2.0 {
            (" ", "")
        } else {
            ("", "")
        };
        let thinking = if self.state == ActivityState::Thinking {
            " ..."
        } else {
            ""
        };
        format!(
            "({}{eye} {eye}{}) {}{thinking}",
            pad.0,
            pad.1,
            self.mouth_shape.glyph()
        )
    }
}
