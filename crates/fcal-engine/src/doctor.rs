use anyhow::Result;
use fcal_proto::BodyPosition;

use crate::orientation::ValidatorConfig;
use crate::statustext::PhraseTable;

pub fn check_validator(cfg: &ValidatorConfig) -> Result<()> {
    anyhow::ensure!(cfg.gravity_mps2 > 9.0 && cfg.gravity_mps2 < 10.5, "validator.gravity_mps2 out of range");
    anyhow::ensure!(cfg.tolerance > 0.0 && cfg.tolerance < 0.5, "validator.tolerance should be in (0, 0.5)");
    anyhow::ensure!(cfg.min_samples >= 1, "validator.min_samples must be >= 1");
    anyhow::ensure!(cfg.window >= cfg.min_samples, "validator.window must be >= validator.min_samples");
    Ok(())
}

pub fn check_phrases(table: &PhraseTable) -> Result<()> {
    anyhow::ensure!(!table.success.is_empty(), "phrases.success is empty");
    anyhow::ensure!(!table.failure.is_empty(), "phrases.failure is empty");
    for p in BodyPosition::ALL {
        anyhow::ensure!(
            table.phrases_for(p).iter().any(|s| !s.trim().is_empty()),
            "no phrase configured for position {}",
            p
        );
    }
    Ok(())
}
