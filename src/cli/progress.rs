use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn create_spinner(multi: &MultiProgress, message: &str) -> Result<ProgressBar> {
    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} {pos} frames\n{msg} | elapsed: {elapsed_precise}",
    )?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    Ok(pb)
}

/// Frames per second over `elapsed`, zero before any time has passed.
pub fn frame_rate(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { frames as f64 / secs } else { 0.0 }
}

#[test]
fn frame_rate_handles_zero_elapsed() {
    assert_eq!(frame_rate(10, Duration::ZERO), 0.0);
    assert!((frame_rate(100, Duration::from_secs(2)) - 50.0).abs() < f64::EPSILON);
}
