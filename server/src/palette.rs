//! Participant color allocation.
//!
//! Colors are a deterministic function of the participant's ordinal position
//! in the room. Beyond the palette size the colors wrap around, which is
//! acceptable degradation rather than an error.

const PALETTE: [&str; 12] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
    "#BB8FCE", "#85C1E9", "#F8B500", "#00CED1",
];

/// Color for the participant at the given ordinal position (count of
/// participants already present at join time).
pub fn color_for(participant_index: usize) -> &'static str {
    PALETTE[participant_index % PALETTE.len()]
}
