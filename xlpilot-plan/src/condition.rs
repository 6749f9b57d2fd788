use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[default]
    #[serde(alias = "=", alias = "==", alias = "equals")]
    Eq,
    #[serde(alias = "!=", alias = "<>", alias = "not_equals")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = ">=", alias = "ge")]
    Gte,
    #[serde(alias = "<=", alias = "le")]
    Lte,
    #[serde(alias = "like")]
    Contains,
    #[serde(alias = "not_like")]
    NotContains,
    #[serde(rename = "startswith", alias = "starts_with")]
    StartsWith,
    #[serde(rename = "endswith", alias = "ends_with")]
    EndsWith,
    #[serde(alias = "is_empty", alias = "is_null", alias = "null")]
    Empty,
    #[serde(alias = "is_not_empty", alias = "not_null", alias = "notempty")]
    NotEmpty,
}

impl CompareOp {
    pub fn needs_value(&self) -> bool {
        !matches!(self, CompareOp::Empty | CompareOp::NotEmpty)
    }

    /// Operators that only make sense on numbers or dates.
    pub fn is_ordering(&self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Lt | CompareOp::Gte | CompareOp::Lte)
    }
}

/// One column compared against a literal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(alias = "field")]
    pub column: String,
    #[serde(default, alias = "op")]
    pub operator: CompareOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Boolean condition tree evaluated per row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[serde(from = "ConditionRepr")]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
    Compare(Comparison),
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Logic {
    #[default]
    #[serde(alias = "all")]
    And,
    #[serde(alias = "any")]
    Or,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionRepr {
    All {
        #[serde(alias = "and")]
        all: Vec<Condition>,
    },
    Any {
        #[serde(alias = "or")]
        any: Vec<Condition>,
    },
    Not {
        not: Box<Condition>,
    },
    Wrapped {
        condition: Box<Condition>,
    },
    Conditions {
        conditions: Vec<Condition>,
        #[serde(default, alias = "logic_operator")]
        logic: Logic,
    },
    Compare(Comparison),
}

impl From<ConditionRepr> for Condition {
    fn from(repr: ConditionRepr) -> Self {
        match repr {
            ConditionRepr::All { all } => Condition::All { all },
            ConditionRepr::Any { any } => Condition::Any { any },
            ConditionRepr::Not { not } => Condition::Not { not },
            ConditionRepr::Wrapped { condition } => *condition,
            ConditionRepr::Conditions { conditions, logic } => match logic {
                Logic::And => Condition::All { all: conditions },
                Logic::Or => Condition::Any { any: conditions },
            },
            ConditionRepr::Compare(c) => Condition::Compare(c),
        }
    }
}

impl Condition {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Condition::All { all: list } | Condition::Any { any: list } => {
                if list.is_empty() {
                    return Err("condition group is empty".into());
                }
                list.iter().try_for_each(Condition::validate)
            }
            Condition::Not { not } => not.validate(),
            Condition::Compare(c) => {
                if c.column.trim().is_empty() {
                    return Err("comparison without a column".into());
                }
                let missing = c.value.as_ref().map_or(true, serde_json::Value::is_null);
                if c.operator.needs_value() && missing {
                    return Err(format!(
                        "operator {:?} on `{}` needs a value",
                        c.operator, c.column
                    ));
                }
                Ok(())
            }
        }
    }

    /// Visits every column name in the tree, allowing it to be rewritten.
    pub fn visit_columns<E>(
        &mut self,
        f: &mut impl FnMut(&mut String) -> Result<(), E>,
    ) -> Result<(), E> {
        match self {
            Condition::All { all: list } | Condition::Any { any: list } => {
                list.iter_mut().try_for_each(|c| c.visit_columns(f))
            }
            Condition::Not { not } => not.visit_columns(f),
            Condition::Compare(c) => f(&mut c.column),
        }
    }
}
