//! No-signal hysteresis.
//!
//! Capture cards keep producing black frames when the source is switched
//! off. After `threshold` consecutive dark frames output is suppressed;
//! the first frame with content brings it back.

use super::transform::OutputImage;

/// Edge of the signal state reported to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTransition {
    Lost,
    Regained,
}

/// What to do with a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDecision {
    pub emit: bool,
    pub transition: Option<SignalTransition>,
}

/// Whether any pixel in the central window is brighter than `threshold`.
///
/// The window spans `[w/4, w/4 + w/2)` horizontally and the same
/// vertically. Images narrower or shorter than two pixels have an empty
/// window and never carry signal. A pixel is dark when every channel is at
/// or below the matching threshold channel.
pub fn has_signal(image: &OutputImage, threshold: [u8; 3]) -> bool {
    let (w, h) = (image.width, image.height);
    let (x0, y0) = (w / 4, h / 4);
    let (x1, y1) = (x0 + w / 2, y0 + h / 2);
    (y0..y1).any(|y| {
        (x0..x1).any(|x| {
            let p = image.pixel(x, y);
            p[0] > threshold[0] || p[1] > threshold[1] || p[2] > threshold[2]
        })
    })
}

/// Consecutive dark-frame counter.
#[derive(Debug, Clone)]
pub struct SignalTracker {
    threshold: u32,
    dark_frames: u32,
}

impl SignalTracker {
    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            dark_frames: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn dark_frames(&self) -> u32 {
        self.dark_frames
    }

    /// Change the threshold; the counter starts over.
    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold.max(1);
        self.dark_frames = 0;
    }

    pub fn is_suppressing(&self) -> bool {
        self.dark_frames >= self.threshold
    }

    /// Feed one decoded frame's signal check.
    pub fn update(&mut self, signal: bool) -> SignalDecision {
        if signal {
            let regained = self.dark_frames >= self.threshold;
            self.dark_frames = 0;
            return SignalDecision {
                emit: true,
                transition: regained.then_some(SignalTransition::Regained),
            };
        }

        self.dark_frames = self.dark_frames.saturating_add(1);
        match self.dark_frames.cmp(&self.threshold) {
            std::cmp::Ordering::Less => SignalDecision {
                emit: true,
                transition: None,
            },
            std::cmp::Ordering::Equal => SignalDecision {
                emit: false,
                transition: Some(SignalTransition::Lost),
            },
            std::cmp::Ordering::Greater => SignalDecision {
                emit: false,
                transition: None,
            },
        }
    }
}
