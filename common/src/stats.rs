//! Ripeness tally over a list of detections.
//!
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{DetectionResult, Ripeness};

/// Number of detections per ripeness class.
///
/// All four classes are always present, with a count of zero where nothing was detected.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(
    from = "BTreeMap<String, usize>",
    into = "BTreeMap<String, usize>"
)]
pub struct RipenessStats {
    counts: [usize; 4],
}

impl RipenessStats {
    /// Count the ripeness classes of a detection list.
    pub fn from_detections(detections: &[DetectionResult]) -> Self {
        let mut stats = Self::default();
        for detection in detections {
            stats.counts[detection.ripeness.index()] += 1;
        }
        stats
    }

    pub fn get(&self, ripeness: Ripeness) -> usize {
        self.counts[ripeness.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().fold(0, |sum, count| sum.saturating_add(*count))
    }

    /// Fraction of all detections that fall into `ripeness`, zero for an empty tally.
    pub fn share(&self, ripeness: Ripeness) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.get(ripeness) as f32 / total as f32,
        }
    }

    /// Iterate over `(class, count)` in display order.
    pub fn iter(&self) -> impl Iterator<Item = (Ripeness, usize)> + '_ {
        Ripeness::ALL.iter().map(|r| (*r, self.get(*r)))
    }
}

impl From<BTreeMap<String, usize>> for RipenessStats {
    fn from(map: BTreeMap<String, usize>) -> Self {
        let mut stats = Self::default();
        // Unknown labels are dropped, missing ones stay at zero. Aliases add up to their class.
        for (label, count) in map {
            if let Some(ripeness) = Ripeness::from_label(&label) {
                let slot = &mut stats.counts[ripeness.index()];
                *slot = slot.saturating_add(count);
            }
        }
        stats
    }
}

impl From<RipenessStats> for BTreeMap<String, usize> {
    fn from(stats: RipenessStats) -> Self {
        stats
            .iter()
            .map(|(ripeness, count)| (ripeness.as_str().to_owned(), count))
            .collect()
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    fn detection(class: &str, ripeness: Ripeness) -> DetectionResult {
        DetectionResult {
            class: class.into(),
            ripeness,
            confidence: 0.5,
            bbox: None,
        }
    }

    #[test]
    fn test_tally_covers_all_classes() {
        let detections = vec![
            detection("banana", Ripeness::Ripen),
            detection("banana", Ripeness::Ripen),
            detection("apple", Ripeness::Overripe),
        ];

        let stats = RipenessStats::from_detections(&detections);

        assert_eq!(stats.get(Ripeness::Ripen), 2);
        assert_eq!(stats.get(Ripeness::Unripen), 0);
        assert_eq!(stats.get(Ripeness::Overripe), 1);
        assert_eq!(stats.get(Ripeness::NoFruit), 0);
        assert_eq!(stats.total(), detections.len());
        assert_eq!(stats.iter().count(), 4);
    }

    #[test]
    fn test_tally_sums_to_list_length() {
        // Every prefix of a mixed list
        let classes = [
            Ripeness::NoFruit,
            Ripeness::Unripen,
            Ripeness::Ripen,
            Ripeness::Unripen,
            Ripeness::Overripe,
            Ripeness::NoFruit,
            Ripeness::NoFruit,
        ];
        let detections: Vec<_> = classes.iter().map(|r| detection("x", *r)).collect();

        for len in 0..=detections.len() {
            let stats = RipenessStats::from_detections(&detections[..len]);
            assert_eq!(stats.total(), len);
            assert_eq!(stats.iter().map(|(_, count)| count).sum::<usize>(), len);
        }
    }

    #[test]
    fn test_empty_tally() {
        let stats = RipenessStats::from_detections(&[]);
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.share(Ripeness::Ripen), 0.0);
        assert!(stats.iter().all(|(_, count)| count == 0));
    }

    #[test]
    fn test_server_stats_default_missing_classes() -> Result<(), Error> {
        let stats: RipenessStats = serde_json::from_str(r#"{"RIPEN": 3, "Inmaduro": 1, "GREEN": 9}"#)?;
        assert_eq!(stats.get(Ripeness::Ripen), 3);
        assert_eq!(stats.get(Ripeness::Unripen), 1);
        assert_eq!(stats.get(Ripeness::Overripe), 0);
        assert_eq!(stats.get(Ripeness::NoFruit), 0);
        assert_eq!(stats.share(Ripeness::Ripen), 0.75);

        let json = serde_json::to_string(&stats)?;
        assert_eq!(json, r#"{"NO-FRUIT":0,"OVERRIPE":0,"RIPEN":3,"UNRIPEN":1}"#);

        Ok(())
    }

    #[test]
    fn test_server_stats_aliases_add_up() -> Result<(), Error> {
        let stats: RipenessStats = serde_json::from_str(r#"{"RIPEN": 2, "Maduro": 1}"#)?;
        assert_eq!(stats.get(Ripeness::Ripen), 3);

        // Huge counts saturate instead of overflowing
        let stats: RipenessStats =
            serde_json::from_str(r#"{"RIPEN": 18446744073709551615, "Maduro": 1, "UNRIPEN": 1}"#)?;
        assert_eq!(stats.get(Ripeness::Ripen), usize::MAX);
        assert_eq!(stats.total(), usize::MAX);

        Ok(())
    }
}
