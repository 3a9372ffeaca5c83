//! Ambient: `Sample`/`Dataset` and CSV loading. Spec §1 treats "CSV file
//! parsing particulars" as an external collaborator, but *some* concrete
//! loader has to exist for the trainer to have data to train on — this is
//! the minimal reader spec §6 actually specifies the wire format for
//! (`label, feat_0, feat_1, ..., feat_{F-1}`, decimal integers, with an
//! optional `*_dp.csv` metadata sidecar).

use crate::error::ConfigError;
use std::path::Path;

/// A single (features, label) pair. Features are small unsigned integers
/// in `[0, 2^B - 1]` for the dataset's quantization bit-width `B`; label is
/// in `[0, C)` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub features: Vec<u8>,
    pub label: u8,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub samples: Vec<Sample>,
    pub num_features: usize,
    /// Quantization bit-width, `B`, either sourced from the `*_dp.csv`
    /// sidecar or from config (spec §3: "if missing, the trainer reads it
    /// from config").
    pub quantization_bits: Option<u8>,
    /// Class count, `C`, similarly sourced from the sidecar when present.
    pub num_labels: Option<u16>,
}

const VALID_QUANTIZATION_WIDTHS: [u8; 6] = [1, 2, 3, 4, 6, 8];

pub fn validate_quantization_bits(b: u8) -> Result<u8, ConfigError> {
    if VALID_QUANTIZATION_WIDTHS.contains(&b) {
        Ok(b)
    } else {
        Err(ConfigError::InvalidQuantizationBitWidth(b))
    }
}

impl Dataset {
    /// Parses `label, feat_0, ..., feat_{F-1}` records, one per line.
    pub fn parse_csv(contents: &str) -> Result<Self, ConfigError> {
        let mut samples = Vec::new();
        let mut num_features = None;
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split(',').map(|f| f.trim());
            let label: u8 = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ConfigError::MalformedRecord {
                    line: line_no + 1,
                    found: 0,
                    expected: num_features.map(|f| f + 1).unwrap_or(1),
                })?;
            let features: Vec<u8> = fields
                .map(|s| {
                    s.parse::<u8>().map_err(|_| ConfigError::MalformedRecord {
                        line: line_no + 1,
                        found: 0,
                        expected: num_features.map(|f| f + 1).unwrap_or(1),
                    })
                })
                .collect::<Result<_, _>>()?;
            match num_features {
                None => num_features = Some(features.len()),
                Some(expected) if expected != features.len() => {
                    return Err(ConfigError::MalformedRecord {
                        line: line_no + 1,
                        found: features.len(),
                        expected,
                    });
                }
                _ => {}
            }
            samples.push(Sample { features, label });
        }
        Ok(Self {
            samples,
            num_features: num_features.unwrap_or(0),
            quantization_bits: None,
            num_labels: None,
        })
    }

    /// Applies a `*_dp.csv` metadata sidecar's `quantization_coefficient`
    /// and `num_labels` lines, overriding config silently (spec §6).
    pub fn apply_metadata(&mut self, metadata_contents: &str) {
        for line in metadata_contents.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once(',') else {
                continue;
            };
            match key.trim() {
                "quantization_coefficient" => {
                    if let Ok(b) = value.trim().parse::<u8>() {
                        self.quantization_bits = Some(b);
                    }
                }
                "num_labels" => {
                    if let Ok(c) = value.trim().parse::<u16>() {
                        self.num_labels = Some(c);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut dataset = Self::parse_csv(&contents)?;
        let metadata_path = metadata_sidecar_path(path);
        if let Ok(metadata) = std::fs::read_to_string(&metadata_path) {
            dataset.apply_metadata(&metadata);
        }
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn metadata_sidecar_path(data_path: &Path) -> std::path::PathBuf {
    let stem = data_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let parent = data_path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}_dp.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_label_and_features() {
        let csv = "0,1,2,3\n1,0,0,1\n";
        let d = Dataset::parse_csv(csv).unwrap();
        assert_eq!(d.samples.len(), 2);
        assert_eq!(d.num_features, 3);
        assert_eq!(d.samples[0], Sample { features: vec![1, 2, 3], label: 0 });
    }

    #[test]
    fn rejects_ragged_records() {
        let csv = "0,1,2\n1,0\n";
        assert!(matches!(Dataset::parse_csv(csv), Err(ConfigError::MalformedRecord { .. })));
    }

    #[test]
    fn metadata_sidecar_overrides_silently() {
        let mut d = Dataset::parse_csv("0,1,2\n").unwrap();
        d.apply_metadata("quantization_coefficient,4\nnum_labels,3\n");
        assert_eq!(d.quantization_bits, Some(4));
        assert_eq!(d.num_labels, Some(3));
    }

    #[test]
    fn valid_quantization_widths() {
        for b in [1, 2, 3, 4, 6, 8] {
            assert!(validate_quantization_bits(b).is_ok());
        }
        for b in [0, 5, 7, 9, 16] {
            assert!(validate_quantization_bits(b).is_err());
        }
    }

    #[test]
    fn ignores_blank_lines() {
        let csv = "0,1\n\n1,0\n";
        let d = Dataset::parse_csv(csv).unwrap();
        assert_eq!(d.samples.len(), 2);
    }
}
