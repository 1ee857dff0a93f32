use crate::config::ClassificationConfig;
use crate::math::stats::StatsHelper;
use crate::prelude::{Classification, PulseWaveform};
use crate::processing::peaks::PeakFinder;
use crate::qc::events::{EventBus, QcEvent};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

/// Votes cast by the four peak heuristics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub is_sensor: u32,
    pub is_air: u32,
}

impl VoteTally {
    pub fn cast(&mut self, vote: Classification) {
        match vote {
            Classification::Sensor => self.is_sensor += 1,
            Classification::Air => self.is_air += 1,
        }
    }

    /// Majority decision; a tie holds the previous classification.
    pub fn decide(&self, previous: Classification) -> Classification {
        if self.is_air < self.is_sensor {
            Classification::Sensor
        } else if self.is_air > self.is_sensor {
            Classification::Air
        } else {
            previous
        }
    }
}

/// Feature values behind one classification, kept for logging and observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakFeatures {
    pub main_peak_index: Option<usize>,
    pub prominent_peaks: usize,
    pub wide_peaks: usize,
    pub threshold_peaks: usize,
}

pub struct Classifier {
    config: ClassificationConfig,
    previous: Classification,
    bus: Option<EventBus>,
    logger: LogManager,
}

impl Classifier {
    pub fn new(config: ClassificationConfig) -> Self {
        Self {
            config,
            previous: Classification::Sensor,
            bus: None,
            logger: LogManager::new("classifier"),
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn current(&self) -> Classification {
        self.previous
    }

    pub fn classify(&mut self, waveform: &PulseWaveform) -> Classification {
        let segment = waveform.segment(self.config.window_start_ps, self.config.window_end_ps);
        let (features, tally) = self.vote(segment);
        let classification = tally.decide(self.previous);

        self.logger.debug(&format!(
            "segment {} samples, rms {:.4}, {:?}, votes sensor {} / air {}",
            segment.len(),
            StatsHelper::rms(segment),
            features,
            tally.is_sensor,
            tally.is_air
        ));
        if classification != self.previous {
            self.logger
                .record(&format!("classification {} -> {}", self.previous, classification));
        }
        self.previous = classification;

        if let Some(bus) = &self.bus {
            bus.publish(QcEvent::ClassificationUpdated {
                classification,
                tally,
            });
        }
        classification
    }

    /// Runs the four heuristics on an already windowed segment.
    pub fn vote(&self, segment: &[f64]) -> (PeakFeatures, VoteTally) {
        let cfg = &self.config;
        let mut tally = VoteTally::default();

        let spaced = PeakFinder::by_distance(segment, cfg.distance);
        let main_peak_index = spaced
            .iter()
            .copied()
            .max_by(|&a, &b| segment[a].total_cmp(&segment[b]));
        tally.cast(match main_peak_index {
            Some(idx) if idx >= cfg.pulse_position => Classification::Sensor,
            _ => Classification::Air,
        });

        let prominent_peaks = PeakFinder::by_prominence(segment, cfg.prominence).len();
        tally.cast(count_vote(prominent_peaks, cfg.max_prominent_peaks));

        let wide_peaks = PeakFinder::by_width(segment, cfg.width).len();
        tally.cast(count_vote(wide_peaks, cfg.max_wide_peaks));

        let threshold_peaks = PeakFinder::by_threshold(segment, cfg.threshold).len();
        tally.cast(count_vote(threshold_peaks, cfg.max_threshold_peaks));

        let features = PeakFeatures {
            main_peak_index,
            prominent_peaks,
            wide_peaks,
            threshold_peaks,
        };
        (features, tally)
    }
}

fn count_vote(count: usize, max: usize) -> Classification {
    if count > max {
        Classification::Air
    } else {
        Classification::Sensor
    }
}
