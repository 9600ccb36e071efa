pub mod time;

/// Generate a run id for log correlation.
pub fn longid() -> String {
    nanoid::nanoid!(21)
}
