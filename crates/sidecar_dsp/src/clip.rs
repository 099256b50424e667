//! Gain and Clipping
//!
//! Several boosted bands can push a chunk past full scale. The engine scales
//! each chunk by the user volume and then hard-limits it to [-1, 1] before
//! it reaches the device.

/// Clamp every sample into [-1, 1]
///
/// # Real-time Safety
/// No allocations, O(n) time.
#[inline]
fn hard_clip(buffer: &mut [f32]) {
    for sample in buffer.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

/// Multiply by `gain`, then clamp into [-1, 1]
#[inline]
pub fn apply_gain_and_clip(buffer: &mut [f32], gain: f32) {
    if (gain - 1.0).abs() <= f32::EPSILON {
        hard_clip(buffer);
        return;
    }
    for sample in buffer.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_clip_limits_range() {
        let mut buffer = vec![0.3, -0.3, 1.5, -1.5, 10.0, -10.0];
        hard_clip(&mut buffer);
        assert_eq!(buffer, vec![0.3, -0.3, 1.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_gain_applied_before_clip() {
        let mut buffer = vec![0.5, -0.5, 0.9];
        apply_gain_and_clip(&mut buffer, 2.0);
        assert_eq!(buffer, vec![1.0, -1.0, 1.0]);

        let mut buffer = vec![0.5, -0.5];
        apply_gain_and_clip(&mut buffer, 0.5);
        assert_eq!(buffer, vec![0.25, -0.25]);
    }

    #[test]
    fn test_zero_gain_silences() {
        let mut buffer = vec![0.7, -0.2];
        apply_gain_and_clip(&mut buffer, 0.0);
        assert!(buffer.iter().all(|s| *s == 0.0));
    }
}
