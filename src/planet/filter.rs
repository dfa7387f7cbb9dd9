use crate::config::Region;
use serde::Serialize;

/// Body of a quick search.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub item_types: Vec<String>,
    pub filter: Filter,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Filter {
    AndFilter {
        config: Vec<Filter>,
    },
    GeometryFilter {
        field_name: String,
        config: serde_json::Value,
    },
    DateRangeFilter {
        field_name: String,
        config: DateRange,
    },
    RangeFilter {
        field_name: String,
        config: Range,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DateRange {
    pub gte: String,
    pub lte: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Range {
    pub lte: f64,
}

impl SearchRequest {
    /// Items intersecting the region footprint, acquired within its date range (both days
    /// included) and no cloudier than its cloud limit.
    pub fn for_region(item_type: &str, region: &Region, footprint: serde_json::Value) -> Self {
        let geometry = Filter::GeometryFilter {
            field_name: "geometry".to_string(),
            config: footprint,
        };
        let acquired = Filter::DateRangeFilter {
            field_name: "acquired".to_string(),
            config: DateRange {
                gte: format!("{}T00:00:00.000Z", region.from),
                lte: format!("{}T23:59:59.999Z", region.to),
            },
        };
        let cloud_cover = Filter::RangeFilter {
            field_name: "cloud_cover".to_string(),
            config: Range {
                lte: region.cloud_limit,
            },
        };

        Self {
            item_types: vec![item_type.to_string()],
            filter: Filter::AndFilter {
                config: vec![geometry, acquired, cloud_cover],
            },
        }
    }
}
