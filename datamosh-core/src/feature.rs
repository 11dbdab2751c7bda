//! Registry of editable codec features.
//!
//! A feature is one kind of codec state that can be exported to and applied
//! from an interchange document. Codecs declare which features they support;
//! the user selects a subset on the command line, subject to the mutual
//! exclusions below.

use bitflags::bitflags;

use crate::error::{Error, Result};

/// An editable codec feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Frame metadata (picture type, dimensions).
    Info,
    /// Quantized DCT coefficients.
    QDct,
    /// Quantized DCT coefficients, DC only.
    QDc,
    /// Motion vectors, absolute values.
    Mv,
    /// Motion vectors, coded deltas.
    MvDelta,
    /// Quantization scale.
    QScale,
    /// Quantization tables.
    Dqt,
    /// Huffman tables.
    Dht,
    /// Macroblock-level raw bits.
    Mb,
}

impl Feature {
    /// All features, in registry order. The order is observable: interchange
    /// files list selected features in this order.
    pub const ALL: [Feature; 9] = [
        Feature::Info,
        Feature::QDct,
        Feature::QDc,
        Feature::Mv,
        Feature::MvDelta,
        Feature::QScale,
        Feature::Dqt,
        Feature::Dht,
        Feature::Mb,
    ];

    /// Key used in interchange documents and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Feature::Info => "info",
            Feature::QDct => "q_dct",
            Feature::QDc => "q_dc",
            Feature::Mv => "mv",
            Feature::MvDelta => "mv_delta",
            Feature::QScale => "qscale",
            Feature::Dqt => "dqt",
            Feature::Dht => "dht",
            Feature::Mb => "mb",
        }
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Feature::Info => "info",
            Feature::QDct => "quantized DCT coefficients",
            Feature::QDc => "quantized DCT coefficients (DC only)",
            Feature::Mv => "motion vectors",
            Feature::MvDelta => "motion vectors (delta only)",
            Feature::QScale => "quantization scale",
            Feature::Dqt => "quantization table",
            Feature::Dht => "huffman table",
            Feature::Mb => "macroblock",
        }
    }

    /// Look up a feature by its interchange key.
    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Whether this feature is selected when the user selects none.
    pub fn is_default(self) -> bool {
        !matches!(self, Feature::QDct | Feature::MvDelta | Feature::Mb)
    }

    /// Whether selecting `self` forbids also selecting `other`.
    ///
    /// Absolute and delta motion vectors rewrite the same syntax elements, so
    /// only one may own them. Macroblock editing owns the frame's entire
    /// coded payload and excludes everything except metadata.
    pub fn excludes(self, other: Feature) -> bool {
        match self {
            Feature::Mv => other == Feature::MvDelta,
            Feature::MvDelta => other == Feature::Mv,
            Feature::Mb => other != Feature::Mb && other != Feature::Info,
            _ => false,
        }
    }

    fn bit(self) -> FeatureSet {
        match self {
            Feature::Info => FeatureSet::INFO,
            Feature::QDct => FeatureSet::Q_DCT,
            Feature::QDc => FeatureSet::Q_DC,
            Feature::Mv => FeatureSet::MV,
            Feature::MvDelta => FeatureSet::MV_DELTA,
            Feature::QScale => FeatureSet::QSCALE,
            Feature::Dqt => FeatureSet::DQT,
            Feature::Dht => FeatureSet::DHT,
            Feature::Mb => FeatureSet::MB,
        }
    }
}

bitflags! {
    /// A set of selected features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FeatureSet: u16 {
        const INFO = 1 << 0;
        const Q_DCT = 1 << 1;
        const Q_DC = 1 << 2;
        const MV = 1 << 3;
        const MV_DELTA = 1 << 4;
        const QSCALE = 1 << 5;
        const DQT = 1 << 6;
        const DHT = 1 << 7;
        const MB = 1 << 8;
    }
}

impl FeatureSet {
    /// The set selected when the user selects nothing explicitly.
    pub fn defaults() -> FeatureSet {
        Feature::ALL
            .iter()
            .filter(|f| f.is_default())
            .fold(FeatureSet::empty(), |set, f| set | f.bit())
    }

    pub fn with(self, feature: Feature) -> FeatureSet {
        self | feature.bit()
    }

    pub fn has(self, feature: Feature) -> bool {
        self.contains(feature.bit())
    }

    /// Iterate selected features in registry order.
    pub fn iter_features(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |f| self.has(*f))
    }

    /// Reject sets containing mutually exclusive features.
    pub fn validate(self) -> Result<()> {
        for a in self.iter_features() {
            for b in self.iter_features() {
                if a.excludes(b) {
                    return Err(Error::config(format!(
                        "features '{}' and '{}' cannot be selected together",
                        a.name(),
                        b.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        iter.into_iter()
            .fold(FeatureSet::empty(), |set, f| set.with(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for f in Feature::ALL {
            assert_eq!(Feature::from_name(f.name()), Some(f));
        }
        assert_eq!(Feature::from_name("qt"), None);
    }

    #[test]
    fn test_defaults() {
        let d = FeatureSet::defaults();
        assert!(d.has(Feature::Info));
        assert!(d.has(Feature::Mv));
        assert!(d.has(Feature::QDc));
        assert!(!d.has(Feature::QDct));
        assert!(!d.has(Feature::MvDelta));
        assert!(!d.has(Feature::Mb));
    }

    #[test]
    fn test_mv_exclusion() {
        let set: FeatureSet = [Feature::Mv, Feature::MvDelta].into_iter().collect();
        assert!(set.validate().is_err());
        let set: FeatureSet = [Feature::Mv, Feature::QScale].into_iter().collect();
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_mb_excludes_all_but_info() {
        let set: FeatureSet = [Feature::Mb, Feature::Info].into_iter().collect();
        assert!(set.validate().is_ok());
        let set: FeatureSet = [Feature::Mb, Feature::QScale].into_iter().collect();
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_iter_order() {
        let set: FeatureSet = [Feature::Dht, Feature::Info, Feature::Mv]
            .into_iter()
            .collect();
        let order: Vec<_> = set.iter_features().map(Feature::name).collect();
        assert_eq!(order, ["info", "mv", "dht"]);
    }
}
