//! ASCII avatar frame library.
//!
//! Frames for each animation state load from `<dir>/<state>.txt`, with
//! individual frames separated by the literal token `FRAME` and empty frames
//! filtered out. A state with no usable file falls back to its built-in
//! canonical face, so the broadcast service always has something to send.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::core::session::AnimationState;

/// Token separating frames inside an animation file.
const FRAME_SEPARATOR: &str = "FRAME";

const IDLE_FACE: &str = r#"
   +----------------+
   |                |
   |    /\    /\    |
   |   /  \  /  \   |
   |  |    ||    |  |
   |  |    ||    |  |
   |   \__/  \__/   |
   |                |
   |      ----      |
   |                |
   +----------------+
"#;

const TALKING_FACE: &str = r#"
   +----------------+
   |                |
   |    /\    /\    |
   |   /  \  /  \   |
   |  |    ||    |  |
   |  |    ||    |  |
   |   \__/  \__/   |
   |                |
   |      ====      |
   |                |
   +----------------+
"#;

const LISTENING_FACE: &str = r#"
   +----------------+
   |                |
   |    /\    /\    |
   |   /  \  /  \   |
   |  |    ||    |  |
   |  |    ||    |  |
   |   \__/  \__/   |
   |                |
   |      ....      |
   |                |
   +----------------+
"#;

const THINKING_FACE: &str = r#"
   +----------------+
   |                |
   |    /\    /\    |
   |   /  \  /  \   |
   |  |    ||    |  |
   |  |    ||    |  |
   |   \__/  \__/   |
   |                |
   |      ????      |
   |                |
   +----------------+
"#;

fn builtin_face(state: AnimationState) -> &'static str {
    match state {
        AnimationState::Idle => IDLE_FACE,
        AnimationState::Listening => LISTENING_FACE,
        AnimationState::Thinking => THINKING_FACE,
        AnimationState::Talking => TALKING_FACE,
    }
}

/// Immutable set of renderable frames per animation state.
///
/// Variant selection is purely cosmetic; callers pass a tick counter and the
/// library cycles through the variants deterministically.
pub struct FrameLibrary {
    frames: HashMap<AnimationState, Vec<String>>,
}

impl FrameLibrary {
    /// Library containing only the built-in canonical face per state.
    pub fn builtin() -> Self {
        let frames = AnimationState::ALL
            .iter()
            .map(|&state| (state, vec![builtin_face(state).to_string()]))
            .collect();
        Self { frames }
    }

    /// Load animation files from `dir`, falling back to the built-in face
    /// for any state whose file is missing, unreadable, or empty.
    pub fn load(dir: &Path) -> Self {
        let mut frames = HashMap::new();

        for &state in AnimationState::ALL.iter() {
            let path = dir.join(format!("{state}.txt"));
            let variants = match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let loaded = split_frames(&content);
                    if loaded.is_empty() {
                        warn!(
                            "animation file {} contains no usable frames, using built-in",
                            path.display()
                        );
                        vec![builtin_face(state).to_string()]
                    } else {
                        debug!(
                            "loaded {} frame(s) for '{}' from {}",
                            loaded.len(),
                            state,
                            path.display()
                        );
                        loaded
                    }
                }
                Err(e) => {
                    debug!(
                        "no animation file for '{}' ({}): using built-in",
                        state, e
                    );
                    vec![builtin_face(state).to_string()]
                }
            };
            frames.insert(state, variants);
        }

        Self { frames }
    }

    /// The frame to render for `state` at the given viewer tick.
    pub fn frame(&self, state: AnimationState, tick: usize) -> &str {
        let variants = &self.frames[&state];
        &variants[tick % variants.len()]
    }

    /// Number of variants available for a state.
    pub fn variant_count(&self, state: AnimationState) -> usize {
        self.frames[&state].len()
    }
}

fn split_frames(content: &str) -> Vec<String> {
    content
        .split(FRAME_SEPARATOR)
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| frame.to_string())
        .collect()
}
