// Output Comparator: structural deep comparison with numeric epsilon,
// timestamp tolerance, and NaN/∞ rules (spec.md §4.1).
//
// Grounded on the Python original's `OutputComparator`
// (examples/original_source/python/vesper_verification/differential.py),
// rendered as a pure, side-effect-free walk the way the teacher's
// `ShadowEnvironment::check_assertion` walks an ontology (shadow.rs).

use crate::value::{OrderedMap, Value};
use serde::{Deserialize, Serialize};

/// One structural difference between two outputs, anchored to a path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Difference {
    pub path: String,
    pub kind: DifferenceKind,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DifferenceKind {
    NullMismatch {
        oracle_value: Option<String>,
        candidate_value: Option<String>,
    },
    TypeMismatch {
        oracle_type: String,
        candidate_type: String,
    },
    MissingInOracle {
        candidate_value: String,
    },
    MissingInCandidate {
        oracle_value: String,
    },
    LengthMismatch {
        oracle_length: usize,
        candidate_length: usize,
    },
    NanMismatch {
        oracle_value: String,
        candidate_value: String,
    },
    InfinitySignMismatch {
        oracle_value: String,
        candidate_value: String,
    },
    NumericMismatch {
        oracle_value: String,
        candidate_value: String,
        difference: f64,
    },
    TimestampMismatch {
        oracle_value: String,
        candidate_value: String,
        difference_ms: f64,
    },
    ValueMismatch {
        oracle_value: String,
        candidate_value: String,
    },
}

/// Report produced when two outputs are not equal under the comparator's
/// tolerance policy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComparisonReport {
    pub differences: Vec<Difference>,
}

impl ComparisonReport {
    pub fn count(&self) -> usize {
        self.differences.len()
    }
}

/// Tolerance policy for the comparator. Defaults match spec.md §4.1.
#[derive(Clone, Debug)]
pub struct Comparator {
    pub epsilon: f64,
    pub timestamp_tolerance_ms: i64,
}

impl Default for Comparator {
    fn default() -> Self {
        Comparator {
            epsilon: 1e-9,
            timestamp_tolerance_ms: 1000,
        }
    }
}

impl Comparator {
    pub fn new(epsilon: f64, timestamp_tolerance_ms: i64) -> Self {
        Comparator {
            epsilon,
            timestamp_tolerance_ms,
        }
    }

    /// Compare two output mappings. `None` means semantically equal.
    pub fn compare(
        &self,
        oracle_out: &OrderedMap,
        candidate_out: &OrderedMap,
    ) -> Option<ComparisonReport> {
        let mut differences = Vec::new();
        self.compare_maps(oracle_out, candidate_out, "root", &mut differences);

        if differences.is_empty() {
            None
        } else {
            Some(ComparisonReport { differences })
        }
    }

    fn compare_values(&self, a: &Value, b: &Value, path: &str, out: &mut Vec<Difference>) {
        match (a.is_null(), b.is_null()) {
            (true, true) => return,
            (true, false) | (false, true) => {
                out.push(Difference {
                    path: path.to_string(),
                    kind: DifferenceKind::NullMismatch {
                        oracle_value: (!a.is_null()).then(|| a.canonical_json()),
                        candidate_value: (!b.is_null()).then(|| b.canonical_json()),
                    },
                });
                return;
            }
            (false, false) => {}
        }

        if !Self::types_compatible(a, b) {
            out.push(Difference {
                path: path.to_string(),
                kind: DifferenceKind::TypeMismatch {
                    oracle_type: a.kind_name().to_string(),
                    candidate_type: b.kind_name().to_string(),
                },
            });
            return;
        }

        match (a, b) {
            (Value::Map(m1), Value::Map(m2)) => self.compare_maps(m1, m2, path, out),
            (Value::List(l1), Value::List(l2)) => self.compare_lists(l1, l2, path, out),
            _ if a.is_numeric() || b.is_numeric() => {
                if let Some(diff) = self.compare_numbers(a, b, path) {
                    out.push(diff);
                }
            }
            (Value::String(s1), _) if looks_like_timestamp(s1) => {
                if let Some(diff) = self.compare_timestamps(a, b, path) {
                    out.push(diff);
                }
            }
            _ => {
                if a != b {
                    out.push(Difference {
                        path: path.to_string(),
                        kind: DifferenceKind::ValueMismatch {
                            oracle_value: a.canonical_json(),
                            candidate_value: b.canonical_json(),
                        },
                    });
                }
            }
        }
    }

    fn types_compatible(a: &Value, b: &Value) -> bool {
        if a.kind_name() == b.kind_name() {
            return true;
        }
        if a.is_numeric() && b.is_numeric() {
            return true;
        }
        if a.is_sequence() && b.is_sequence() {
            return true;
        }
        matches!((a, b), (Value::Map(_), Value::Map(_)))
    }

    fn compare_maps(
        &self,
        a: &OrderedMap,
        b: &OrderedMap,
        path: &str,
        out: &mut Vec<Difference>,
    ) {
        let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            let key_path = format!("{}.{}", path, key);
            match (a.get(key), b.get(key)) {
                (None, Some(bv)) => out.push(Difference {
                    path: key_path,
                    kind: DifferenceKind::MissingInOracle {
                        candidate_value: bv.canonical_json(),
                    },
                }),
                (Some(av), None) => out.push(Difference {
                    path: key_path,
                    kind: DifferenceKind::MissingInCandidate {
                        oracle_value: av.canonical_json(),
                    },
                }),
                (Some(av), Some(bv)) => self.compare_values(av, bv, &key_path, out),
                (None, None) => {}
            }
        }
    }

    fn compare_lists(&self, a: &[Value], b: &[Value], path: &str, out: &mut Vec<Difference>) {
        if a.len() != b.len() {
            out.push(Difference {
                path: path.to_string(),
                kind: DifferenceKind::LengthMismatch {
                    oracle_length: a.len(),
                    candidate_length: b.len(),
                },
            });
        }

        for (i, (av, bv)) in a.iter().zip(b.iter()).enumerate() {
            self.compare_values(av, bv, &format!("{}[{}]", path, i), out);
        }
    }

    fn compare_numbers(&self, a: &Value, b: &Value, path: &str) -> Option<Difference> {
        let f1 = a.as_f64().unwrap_or(f64::NAN);
        let f2 = b.as_f64().unwrap_or(f64::NAN);

        if f1.is_nan() && f2.is_nan() {
            return None;
        }
        if f1.is_nan() || f2.is_nan() {
            return Some(Difference {
                path: path.to_string(),
                kind: DifferenceKind::NanMismatch {
                    oracle_value: a.canonical_json(),
                    candidate_value: b.canonical_json(),
                },
            });
        }

        if f1.is_infinite() && f2.is_infinite() {
            return if f1.is_sign_positive() == f2.is_sign_positive() {
                None
            } else {
                Some(Difference {
                    path: path.to_string(),
                    kind: DifferenceKind::InfinitySignMismatch {
                        oracle_value: a.canonical_json(),
                        candidate_value: b.canonical_json(),
                    },
                })
            };
        }

        let abs_diff = (f1 - f2).abs();
        if abs_diff <= self.epsilon {
            return None;
        }

        if f1.abs() > 1.0 || f2.abs() > 1.0 {
            let relative_diff = abs_diff / f1.abs().max(f2.abs());
            if relative_diff <= self.epsilon {
                return None;
            }
        }

        Some(Difference {
            path: path.to_string(),
            kind: DifferenceKind::NumericMismatch {
                oracle_value: a.canonical_json(),
                candidate_value: b.canonical_json(),
                difference: abs_diff,
            },
        })
    }

    fn compare_timestamps(&self, a: &Value, b: &Value, path: &str) -> Option<Difference> {
        let (sa, sb) = match (a.as_str(), b.as_str()) {
            (Some(sa), Some(sb)) => (sa, sb),
            _ => {
                return (a != b).then(|| Difference {
                    path: path.to_string(),
                    kind: DifferenceKind::ValueMismatch {
                        oracle_value: a.canonical_json(),
                        candidate_value: b.canonical_json(),
                    },
                })
            }
        };

        match (parse_timestamp_ms(sa), parse_timestamp_ms(sb)) {
            (Some(ta), Some(tb)) => {
                let diff_ms = (ta - tb).abs();
                if diff_ms <= self.timestamp_tolerance_ms as f64 {
                    None
                } else {
                    Some(Difference {
                        path: path.to_string(),
                        kind: DifferenceKind::TimestampMismatch {
                            oracle_value: sa.to_string(),
                            candidate_value: sb.to_string(),
                            difference_ms: diff_ms,
                        },
                    })
                }
            }
            _ => (sa != sb).then(|| Difference {
                path: path.to_string(),
                kind: DifferenceKind::ValueMismatch {
                    oracle_value: sa.to_string(),
                    candidate_value: sb.to_string(),
                },
            }),
        }
    }
}

fn looks_like_timestamp(s: &str) -> bool {
    s.len() >= 10 && s.as_bytes().get(4) == Some(&b'-') && s.as_bytes().get(7) == Some(&b'-')
}

/// Parse an ISO-8601-ish timestamp into milliseconds since epoch. Returns
/// `None` on any parse failure so callers fall back to string equality.
fn parse_timestamp_ms(s: &str) -> Option<f64> {
    let normalized = s.replace('Z', "+00:00");
    chrono::DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.timestamp_millis() as f64 + (dt.timestamp_subsec_nanos() % 1_000_000) as f64 / 1_000_000.0)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::omap;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn reflexivity_holds_for_arbitrary_ints(x in any::<i64>()) {
            let cmp = Comparator::default();
            let m = omap! { "x" => x };
            prop_assert!(cmp.compare(&m, &m).is_none());
        }

        #[test]
        fn symmetry_of_outcome_holds(a in -1000i64..1000, b in -1000i64..1000) {
            let cmp = Comparator::default();
            let m1 = omap! { "x" => a };
            let m2 = omap! { "x" => b };

            let forward = cmp.compare(&m1, &m2).is_some();
            let backward = cmp.compare(&m2, &m1).is_some();
            prop_assert_eq!(forward, backward);
        }
    }
}
