//! Decorrelation engine: undoes the encoder's chained adaptive predictors.
//!
//! Passes run in chain order over interleaved residuals and leave
//! reconstructed samples in place. Long stereo runs are split into an
//! 8-sample stateful head and a tail that reads its history straight from
//! the already reconstructed buffer, which keeps the adaptive weights in
//! step with the encoder's chunking.

use crate::structs::decorr::{DecorrPass, MAX_TERM};

const RING_MASK: usize = MAX_TERM - 1;

/// Stereo runs shorter than this are decoded with the stateful form only.
const CONT_THRESHOLD: usize = 16;
const CONT_HEAD: usize = 8;

#[inline(always)]
pub fn apply_weight(weight: i32, sample: i32) -> i32 {
    ((weight as i64 * sample as i64 + 512) >> 10) as i32
}

#[inline(always)]
pub fn update_weight(weight: &mut i32, delta: i32, source: i32, result: i32) {
    if source != 0 && result != 0 {
        if (source ^ result) < 0 {
            *weight = weight.wrapping_sub(delta);
        } else {
            *weight = weight.wrapping_add(delta);
        }
    }
}

#[inline(always)]
pub fn update_weight_clip(weight: &mut i32, delta: i32, source: i32, result: i32) {
    if source != 0 && result != 0 {
        if (source ^ result) < 0 {
            *weight = (*weight - delta).max(-1024);
        } else {
            *weight = (*weight + delta).min(1024);
        }
    }
}

#[inline(always)]
fn predict_17(h0: i32, h1: i32) -> i32 {
    h0.wrapping_mul(2).wrapping_sub(h1)
}

#[inline(always)]
fn predict_18(h0: i32, h1: i32) -> i32 {
    h0.wrapping_mul(3).wrapping_sub(h1) >> 1
}

/// Rotates a history ring so the oldest sample lands in slot 0.
fn rotate_history(samples: &mut [i32; MAX_TERM], m: usize) {
    if m != 0 {
        samples.rotate_left(m & RING_MASK);
    }
}

/// Runs one pass over `count` interleaved stereo samples, keeping its
/// history in the pass state.
pub fn decorr_stereo_pass(dpp: &mut DecorrPass, buffer: &mut [i32], count: usize) {
    let delta = dpp.delta;
    let frames = buffer[..count * 2].chunks_exact_mut(2);

    match dpp.term {
        17 | 18 => {
            let predict = if dpp.term == 17 { predict_17 } else { predict_18 };

            for frame in frames {
                let sam_a = predict(dpp.samples_a[0], dpp.samples_a[1]);
                dpp.samples_a[1] = dpp.samples_a[0];
                dpp.samples_a[0] = apply_weight(dpp.weight_a, sam_a).wrapping_add(frame[0]);
                update_weight(&mut dpp.weight_a, delta, sam_a, frame[0]);
                frame[0] = dpp.samples_a[0];

                let sam_b = predict(dpp.samples_b[0], dpp.samples_b[1]);
                dpp.samples_b[1] = dpp.samples_b[0];
                dpp.samples_b[0] = apply_weight(dpp.weight_b, sam_b).wrapping_add(frame[1]);
                update_weight(&mut dpp.weight_b, delta, sam_b, frame[1]);
                frame[1] = dpp.samples_b[0];
            }
        }
        1..=8 => {
            let mut m = 0;
            let mut k = dpp.term as usize & RING_MASK;

            for frame in frames {
                let sam_a = dpp.samples_a[m];
                dpp.samples_a[k] = apply_weight(dpp.weight_a, sam_a).wrapping_add(frame[0]);
                update_weight(&mut dpp.weight_a, delta, sam_a, frame[0]);
                frame[0] = dpp.samples_a[k];

                let sam_b = dpp.samples_b[m];
                dpp.samples_b[k] = apply_weight(dpp.weight_b, sam_b).wrapping_add(frame[1]);
                update_weight(&mut dpp.weight_b, delta, sam_b, frame[1]);
                frame[1] = dpp.samples_b[k];

                m = (m + 1) & RING_MASK;
                k = (k + 1) & RING_MASK;
            }

            rotate_history(&mut dpp.samples_a, m);
            rotate_history(&mut dpp.samples_b, m);
        }
        -1 => {
            for frame in frames {
                let sam_a = frame[0].wrapping_add(apply_weight(dpp.weight_a, dpp.samples_a[0]));
                update_weight_clip(&mut dpp.weight_a, delta, dpp.samples_a[0], frame[0]);
                frame[0] = sam_a;

                dpp.samples_a[0] = frame[1].wrapping_add(apply_weight(dpp.weight_b, sam_a));
                update_weight_clip(&mut dpp.weight_b, delta, sam_a, frame[1]);
                frame[1] = dpp.samples_a[0];
            }
        }
        -2 => {
            for frame in frames {
                let sam_b = frame[1].wrapping_add(apply_weight(dpp.weight_b, dpp.samples_b[0]));
                update_weight_clip(&mut dpp.weight_b, delta, dpp.samples_b[0], frame[1]);
                frame[1] = sam_b;

                dpp.samples_b[0] = frame[0].wrapping_add(apply_weight(dpp.weight_a, sam_b));
                update_weight_clip(&mut dpp.weight_a, delta, sam_b, frame[0]);
                frame[0] = dpp.samples_b[0];
            }
        }
        -3 => {
            for frame in frames {
                let sam_a = frame[0].wrapping_add(apply_weight(dpp.weight_a, dpp.samples_a[0]));
                update_weight_clip(&mut dpp.weight_a, delta, dpp.samples_a[0], frame[0]);
                let sam_b = frame[1].wrapping_add(apply_weight(dpp.weight_b, dpp.samples_b[0]));
                update_weight_clip(&mut dpp.weight_b, delta, dpp.samples_b[0], frame[1]);

                dpp.samples_b[0] = sam_a;
                dpp.samples_a[0] = sam_b;
                frame[0] = sam_a;
                frame[1] = sam_b;
            }
        }
        _ => {}
    }
}

/// Runs one pass over the stereo samples starting at value offset `start`,
/// reading history from the reconstructed samples before it.
///
/// `start` must leave at least `2 * MAX_TERM` values of history.
pub fn decorr_stereo_pass_cont(dpp: &mut DecorrPass, buffer: &mut [i32], start: usize, count: usize) {
    let delta = dpp.delta;
    let end = start + count * 2;
    let mut weight_a = dpp.weight_a;
    let mut weight_b = dpp.weight_b;

    match dpp.term {
        17 | 18 => {
            let predict = if dpp.term == 17 { predict_17 } else { predict_18 };

            for i in (start..end).step_by(2) {
                let sam_a = predict(buffer[i - 2], buffer[i - 4]);
                let residual = buffer[i];
                buffer[i] = apply_weight(weight_a, sam_a).wrapping_add(residual);
                update_weight(&mut weight_a, delta, sam_a, residual);

                let sam_b = predict(buffer[i - 1], buffer[i - 3]);
                let residual = buffer[i + 1];
                buffer[i + 1] = apply_weight(weight_b, sam_b).wrapping_add(residual);
                update_weight(&mut weight_b, delta, sam_b, residual);
            }

            dpp.samples_b[0] = buffer[end - 1];
            dpp.samples_a[0] = buffer[end - 2];
            dpp.samples_b[1] = buffer[end - 3];
            dpp.samples_a[1] = buffer[end - 4];
        }
        1..=8 => {
            let lag = dpp.term as usize * 2;

            for i in (start..end).step_by(2) {
                let sam_a = buffer[i - lag];
                let residual = buffer[i];
                buffer[i] = apply_weight(weight_a, sam_a).wrapping_add(residual);
                update_weight(&mut weight_a, delta, sam_a, residual);

                let sam_b = buffer[i + 1 - lag];
                let residual = buffer[i + 1];
                buffer[i + 1] = apply_weight(weight_b, sam_b).wrapping_add(residual);
                update_weight(&mut weight_b, delta, sam_b, residual);
            }

            // newest sample goes to slot term - 1, walking back eight frames
            let mut pos = end;
            let mut k = dpp.term as usize + MAX_TERM - 1;
            for _ in 0..MAX_TERM {
                pos -= 1;
                dpp.samples_b[k & RING_MASK] = buffer[pos];
                pos -= 1;
                dpp.samples_a[k & RING_MASK] = buffer[pos];
                k -= 1;
            }
        }
        -1 => {
            for i in (start..end).step_by(2) {
                let residual = buffer[i];
                buffer[i] = apply_weight(weight_a, buffer[i - 1]).wrapping_add(residual);
                update_weight_clip(&mut weight_a, delta, buffer[i - 1], residual);

                let residual = buffer[i + 1];
                buffer[i + 1] = apply_weight(weight_b, buffer[i]).wrapping_add(residual);
                update_weight_clip(&mut weight_b, delta, buffer[i], residual);
            }

            dpp.samples_a[0] = buffer[end - 1];
        }
        -2 => {
            for i in (start..end).step_by(2) {
                let residual = buffer[i + 1];
                buffer[i + 1] = apply_weight(weight_b, buffer[i - 2]).wrapping_add(residual);
                update_weight_clip(&mut weight_b, delta, buffer[i - 2], residual);

                let residual = buffer[i];
                buffer[i] = apply_weight(weight_a, buffer[i + 1]).wrapping_add(residual);
                update_weight_clip(&mut weight_a, delta, buffer[i + 1], residual);
            }

            dpp.samples_b[0] = buffer[end - 2];
        }
        -3 => {
            for i in (start..end).step_by(2) {
                let residual = buffer[i];
                buffer[i] = apply_weight(weight_a, buffer[i - 1]).wrapping_add(residual);
                update_weight_clip(&mut weight_a, delta, buffer[i - 1], residual);

                let residual = buffer[i + 1];
                buffer[i + 1] = apply_weight(weight_b, buffer[i - 2]).wrapping_add(residual);
                update_weight_clip(&mut weight_b, delta, buffer[i - 2], residual);
            }

            dpp.samples_a[0] = buffer[end - 1];
            dpp.samples_b[0] = buffer[end - 2];
        }
        _ => {}
    }

    dpp.weight_a = weight_a;
    dpp.weight_b = weight_b;
}

/// Runs one pass over `count` mono samples.
pub fn decorr_mono_pass(dpp: &mut DecorrPass, buffer: &mut [i32], count: usize) {
    let delta = dpp.delta;
    let samples = buffer[..count].iter_mut();

    match dpp.term {
        17 | 18 => {
            let predict = if dpp.term == 17 { predict_17 } else { predict_18 };

            for sample in samples {
                let sam_a = predict(dpp.samples_a[0], dpp.samples_a[1]);
                dpp.samples_a[1] = dpp.samples_a[0];
                dpp.samples_a[0] = apply_weight(dpp.weight_a, sam_a).wrapping_add(*sample);
                update_weight(&mut dpp.weight_a, delta, sam_a, *sample);
                *sample = dpp.samples_a[0];
            }
        }
        1..=8 => {
            let mut m = 0;
            let mut k = dpp.term as usize & RING_MASK;

            for sample in samples {
                let sam_a = dpp.samples_a[m];
                dpp.samples_a[k] = apply_weight(dpp.weight_a, sam_a).wrapping_add(*sample);
                update_weight(&mut dpp.weight_a, delta, sam_a, *sample);
                *sample = dpp.samples_a[k];

                m = (m + 1) & RING_MASK;
                k = (k + 1) & RING_MASK;
            }

            rotate_history(&mut dpp.samples_a, m);
        }
        _ => {}
    }
}

/// Applies the whole chain to interleaved stereo residuals.
pub fn decorr_stereo(passes: &mut [DecorrPass], buffer: &mut [i32], count: usize) {
    if count < CONT_THRESHOLD {
        for dpp in passes {
            decorr_stereo_pass(dpp, buffer, count);
        }
    } else {
        for dpp in passes {
            decorr_stereo_pass(dpp, buffer, CONT_HEAD);
            decorr_stereo_pass_cont(dpp, buffer, CONT_HEAD * 2, count - CONT_HEAD);
        }
    }
}

pub fn decorr_mono(passes: &mut [DecorrPass], buffer: &mut [i32], count: usize) {
    for dpp in passes {
        decorr_mono_pass(dpp, buffer, count);
    }
}

/// Turns mid/side pairs back into left/right.
pub fn joint_stereo(buffer: &mut [i32], count: usize) {
    for frame in buffer[..count * 2].chunks_exact_mut(2) {
        frame[1] = frame[1].wrapping_sub(frame[0] >> 1);
        frame[0] = frame[0].wrapping_add(frame[1]);
    }
}
