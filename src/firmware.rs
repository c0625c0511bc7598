//! Optional firmware-update capability.
//!
//! Some acquisition boards ship with updatable firmware. The core never
//! depends on the update transport itself; it only surfaces the list of
//! available images and the current update stage so a UI can present
//! progress. The capability is feature-gated (`firmware-update`) and its
//! absence changes no acquisition behavior.

/// One installable firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Stable identifier of the image.
    pub id: String,
    /// Human-readable version string.
    pub version: String,
    /// Short description shown to the user.
    pub description: String,
}

/// Progress of an in-flight firmware update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStage {
    /// No update is running.
    Idle,
    /// Update in progress, percent complete.
    InProgress(u8),
    /// Update finished successfully.
    Done,
    /// Update failed.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

/// Provider of firmware images and update progress.
///
/// Implemented by the platform-specific updater outside this crate.
pub trait FirmwareSource {
    /// Firmware images available for the connected board.
    fn firmwares(&self) -> Vec<FirmwareImage>;

    /// Current update stage.
    fn update_stage(&self) -> UpdateStage;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource;

    impl FirmwareSource for FixedSource {
        fn firmwares(&self) -> Vec<FirmwareImage> {
            vec![FirmwareImage {
                id: "fw-1".to_string(),
                version: "1.2.0".to_string(),
                description: "stability fixes".to_string(),
            }]
        }

        fn update_stage(&self) -> UpdateStage {
            UpdateStage::InProgress(40)
        }
    }

    #[test]
    fn test_source_surface() {
        let source = FixedSource;
        assert_eq!(source.firmwares().len(), 1);
        assert_eq!(source.update_stage(), UpdateStage::InProgress(40));
    }
}
