//! Widget Failure Classification
//!
//! Decides whether a widget failure means "this order was already paid",
//! which the orchestrator recovers from by issuing a new order.
//!
//! The phrases come from configuration because the backend's error text is
//! not a versioned contract. A message matches when it contains any phrase,
//! ignoring case.

use serde::{Deserialize, Serialize};

/// Classification of a widget-reported failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Order already settled; recoverable with a new order id
    DuplicateOrder { matched: String },
    /// Anything else; surfaced verbatim
    Other,
}

/// Matches failure messages against duplicate-order phrases
#[derive(Clone, Debug)]
pub struct DuplicateOrderClassifier {
    // Lowercased once, at construction
    phrases: Vec<String>,
}

impl DuplicateOrderClassifier {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, message: &str) -> FailureClass {
        let haystack = message.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| haystack.contains(phrase.as_str()))
            .map_or(FailureClass::Other, |phrase| FailureClass::DuplicateOrder {
                matched: phrase.clone(),
            })
    }

    pub fn is_duplicate(&self, message: &str) -> bool {
        matches!(self.classify(message), FailureClass::DuplicateOrder { .. })
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckoutConfig;

    #[test]
    fn test_case_insensitive_substring() {
        let classifier = DuplicateOrderClassifier::new(["Already Paid", "duplicate order"]);
        assert_eq!(
            classifier.classify("Payment failed: ORDER ALREADY PAID (code C0021)"),
            FailureClass::DuplicateOrder {
                matched: "already paid".into()
            }
        );
        assert!(classifier.is_duplicate("Duplicate Order detected"));
        assert_eq!(classifier.classify("Card declined"), FailureClass::Other);
    }

    #[test]
    fn test_default_phrases_cover_both_locales() {
        let classifier = DuplicateOrderClassifier::new(&CheckoutConfig::default().duplicate_phrases);
        assert!(classifier.is_duplicate("The order has been paid"));
        assert!(classifier.is_duplicate("支付失败：订单已支付"));
        assert!(!classifier.is_duplicate("Simulated payment declined (demo)"));
    }

    #[test]
    fn test_blank_phrases_ignored() {
        let classifier = DuplicateOrderClassifier::new(["", "   "]);
        assert!(classifier.phrases().is_empty());
        assert!(!classifier.is_duplicate("anything"));
    }
}
