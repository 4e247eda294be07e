use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::timestamp::time_str;

const BAR_TEMPLATE: &str = "{bar:40.cyan/blue} {pos}/{len} samples ({percent}%)\n{msg} | elapsed: {elapsed_precise}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {pos} samples\n{msg} | elapsed: {elapsed_precise}";

/// A bar over the sample count when the total is known, a spinner otherwise.
pub fn create_progress_bar(multi: &MultiProgress, total_samples: Option<u64>) -> Result<ProgressBar> {
    let pb = if let Some(total) = total_samples {
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyle::with_template(&format!(
            "{BAR_TEMPLATE} | ETA: {{eta_precise}}"
        ))?);
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template(SPINNER_TEMPLATE)?);
        pb
    };

    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("initializing decoder");
    Ok(pb)
}

pub fn update_progress(pb: &ProgressBar, decoded_samples: u64, sample_rate: u32) {
    pb.set_position(decoded_samples);
    if sample_rate > 0 {
        pb.set_message(format!(
            "timestamp: {}",
            time_str(decoded_samples as f64 / sample_rate as f64)
        ));
    }
}

pub fn finalize_progress_bar(
    pb: &ProgressBar,
    total_samples: Option<u64>,
    decoded_samples: u64,
    sample_rate: u32,
    start_time: Instant,
) {
    let elapsed = start_time.elapsed().as_secs_f64();
    let audio_duration_secs = decoded_samples as f64 / sample_rate.max(1) as f64;
    let realtime_multiplier = if elapsed > 0.0 {
        audio_duration_secs / elapsed
    } else {
        0.0
    };

    let style = match total_samples {
        Some(_) => ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        None => ProgressStyle::with_template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    };
    pb.set_style(style);

    pb.finish_with_message(format!(
        "speed: {realtime_multiplier:.1}x | timestamp: {}",
        time_str(audio_duration_secs)
    ));
}
