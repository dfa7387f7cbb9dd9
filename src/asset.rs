use serde::{Deserialize, Serialize};
use std::fmt;

/// Key under which the data API lists an asset of an item.
pub trait AssetKey {
    fn key(&self) -> &str;
}

/// The products fetched for every item: the imagery itself and its XML metadata sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Analytic,
    AnalyticXml,
}

impl AssetKind {
    /// Checked in this order for every item.
    pub const ALL: [AssetKind; 2] = [AssetKind::Analytic, AssetKind::AnalyticXml];

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Analytic => "tif",
            Self::AnalyticXml => "xml",
        }
    }

    pub fn file_name(&self, item_id: &str) -> String {
        format!("{}.{}", item_id, self.extension())
    }
}

impl AssetKey for AssetKind {
    fn key(&self) -> &str {
        match self {
            Self::Analytic => "analytic",
            Self::AnalyticXml => "analytic_xml",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
