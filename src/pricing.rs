//! Price lookup for plan cost estimates

use changeplan::{Change, ChangeAction, CostEstimator};
use std::collections::BTreeMap;

/// Monthly prices per resource type, as configured in the policy file.
///
/// Creates and updates are priced at their type's rate; deletes and unknown
/// types have no estimate.
pub struct PriceTable {
    prices: BTreeMap<String, f64>,
}

impl PriceTable {
    pub fn new(prices: BTreeMap<String, f64>) -> Self {
        Self { prices }
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl CostEstimator for PriceTable {
    fn estimate(&self, change: &Change) -> Option<f64> {
        match change.action {
            ChangeAction::Create | ChangeAction::Update => {
                self.prices.get(&change.resource_type).copied()
            }
            ChangeAction::Delete => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changeplan::ResourceConfig;

    #[test]
    fn test_prices_creates_and_updates_only() {
        let table = PriceTable::new(BTreeMap::from([("database".to_string(), 120.0)]));
        let db = ResourceConfig::new("db", "database", "eu-west-1");

        assert_eq!(table.estimate(&Change::create(db.clone())), Some(120.0));
        assert_eq!(
            table.estimate(&Change::update(db.clone(), db.clone().with_property("size", 50))),
            Some(120.0)
        );
        assert_eq!(table.estimate(&Change::delete(db)), None);
        assert_eq!(
            table.estimate(&Change::create(ResourceConfig::new("q", "queue", "eu-west-1"))),
            None
        );
    }
}
