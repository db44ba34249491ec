use crate::table::Table;
use std::collections::BTreeMap;
use tmon_formula::{AggOp, Var};
use tmon_schemas::{Ts, Tuple, Value, ValueType};

/// Grouped aggregation of one operand table.
///
/// Groups without rows are absent. Without group variables an empty operand
/// still yields `CNT = 0` and `SUM = 0` (stamped `now`); `AVG`, `MIN` and
/// `MAX` of nothing are undefined and yield no row.
pub(crate) struct Aggregation<'a> {
    pub op: AggOp,
    pub result: &'a Var,
    pub over: Option<&'a Var>,
    pub group_by: &'a [Var],
    pub out_vars: &'a [Var],
    pub result_type: ValueType,
}

impl Aggregation<'_> {
    pub(crate) fn apply(&self, input: &Table, now: Ts) -> Table {
        // Group key columns in output order, i.e. sorted, without the result.
        let group_pos: Vec<usize> = self
            .out_vars
            .iter()
            .filter(|v| *v != self.result)
            .filter_map(|g| input.column(g))
            .collect();
        let over_pos = self.over.and_then(|v| input.column(v));

        let mut groups: BTreeMap<Tuple, (Vec<Value>, Ts)> = BTreeMap::new();
        for (row, ts) in input.rows() {
            let key: Tuple = group_pos.iter().map(|i| row[*i].clone()).collect();
            let entry = groups.entry(key).or_insert_with(|| (Vec::new(), ts));
            entry.1 = entry.1.max(ts);
            // CNT without an aggregated variable counts rows.
            let value = over_pos.map_or(Value::Int(1), |i| row[i].clone());
            entry.0.push(value);
        }

        let result_at = self
            .out_vars
            .binary_search(self.result)
            .unwrap_or(self.out_vars.len());
        let mut out = Table::empty(self.out_vars.to_vec());

        if groups.is_empty() && self.group_by.is_empty() {
            if let Some(zero) = self.empty_value() {
                out.insert_latest(vec![zero], now);
            }
            return out;
        }

        for (mut key, (values, ts)) in groups {
            let Some(value) = self.compute(&values) else {
                continue;
            };
            key.insert(result_at.min(key.len()), value);
            out.insert_latest(key, ts);
        }
        out
    }

    fn empty_value(&self) -> Option<Value> {
        match (self.op, self.result_type) {
            (AggOp::Cnt, _) => Some(Value::Int(0)),
            (AggOp::Sum, ValueType::Int) => Some(Value::Int(0)),
            (AggOp::Sum, _) => Some(Value::Float(0.0)),
            _ => None,
        }
    }

    fn compute(&self, values: &[Value]) -> Option<Value> {
        match self.op {
            AggOp::Cnt => Some(Value::Int(values.len() as i64)),
            AggOp::Sum if self.result_type == ValueType::Int => values
                .iter()
                .try_fold(0i64, |acc, v| match v {
                    Value::Int(i) => acc.checked_add(*i),
                    _ => None,
                })
                .map(Value::Int),
            AggOp::Sum => Some(Value::Float(float_sum(values)?)),
            AggOp::Avg => {
                if values.is_empty() {
                    return None;
                }
                Some(Value::Float(float_sum(values)? / values.len() as f64))
            }
            AggOp::Min => values.iter().min().cloned(),
            AggOp::Max => values.iter().max().cloned(),
        }
    }
}

fn float_sum(values: &[Value]) -> Option<f64> {
    values
        .iter()
        .try_fold(0.0f64, |acc, v| v.as_f64().map(|x| acc + x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> Vec<Var> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn counts(rows: &[(&str, &str, i64)]) -> Table {
        let mut t = Table::empty(vars(&["n", "s", "sg"]));
        for (s, sg, n) in rows {
            t.insert_latest(
                vec![Value::int(*n), Value::principal(*s), Value::principal(*sg)],
                1,
            );
        }
        t
    }

    #[test]
    fn avg_over_counts_matches_hand_computation() {
        let input = counts(&[("s1", "a", 0), ("s1", "b", 2), ("s1", "c", 2), ("s1", "d", 6)]);
        let result = "m".to_string();
        let over = "n".to_string();
        let group = vars(&["s"]);
        let out_vars = vars(&["m", "s"]);
        let agg = Aggregation {
            op: AggOp::Avg,
            result: &result,
            over: Some(&over),
            group_by: &group,
            out_vars: &out_vars,
            result_type: ValueType::Float,
        };
        let out = agg.apply(&input, 9);
        assert_eq!(out.len(), 1);
        assert!(out.contains(&vec![Value::float(2.5), Value::principal("s1")]));
    }

    #[test]
    fn empty_input_without_groups() {
        let input = Table::empty(vars(&["x"]));
        let result = "c".to_string();
        let over = "x".to_string();
        let out_vars = vars(&["c"]);
        let mut agg = Aggregation {
            op: AggOp::Cnt,
            result: &result,
            over: None,
            group_by: &[],
            out_vars: &out_vars,
            result_type: ValueType::Int,
        };
        let out = agg.apply(&input, 42);
        assert_eq!(out.derived_at(&vec![Value::int(0)]), Some(42));

        agg.op = AggOp::Avg;
        agg.over = Some(&over);
        agg.result_type = ValueType::Float;
        assert!(agg.apply(&input, 42).is_empty());

        agg.op = AggOp::Sum;
        agg.result_type = ValueType::Int;
        assert!(agg.apply(&input, 42).contains(&vec![Value::int(0)]));
    }

    #[test]
    fn int_sum_overflow_drops_the_group() {
        let mut input = Table::empty(vars(&["x"]));
        input.insert_latest(vec![Value::int(i64::MAX)], 1);
        input.insert_latest(vec![Value::int(1)], 1);
        let result = "s".to_string();
        let over = "x".to_string();
        let out_vars = vars(&["s"]);
        let agg = Aggregation {
            op: AggOp::Sum,
            result: &result,
            over: Some(&over),
            group_by: &[],
            out_vars: &out_vars,
            result_type: ValueType::Int,
        };
        assert!(agg.apply(&input, 1).is_empty());
    }
}
