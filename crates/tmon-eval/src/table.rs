use std::collections::{BTreeMap, BTreeSet};
use tmon_formula::Var;
use tmon_schemas::{Ts, Tuple, Value};

/// Binding table: assignments of one node's free variables, each with the
/// timestamp it was derived at.
///
/// Columns are the node's free variables in sorted order. Rows are kept in
/// a `BTreeMap`, so iteration (and everything built from it) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    vars: Vec<Var>,
    rows: BTreeMap<Tuple, Ts>,
}

impl Table {
    pub fn empty(vars: Vec<Var>) -> Self {
        Self {
            vars,
            rows: BTreeMap::new(),
        }
    }

    /// The closed table that holds: one empty assignment.
    pub fn unit(ts: Ts) -> Self {
        let mut t = Self::empty(Vec::new());
        t.rows.insert(Vec::new(), ts);
        t
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Tuple, Ts)> {
        self.rows.iter().map(|(r, ts)| (r, *ts))
    }

    pub fn contains(&self, row: &Tuple) -> bool {
        self.rows.contains_key(row)
    }

    pub fn derived_at(&self, row: &Tuple) -> Option<Ts> {
        self.rows.get(row).copied()
    }

    pub fn column(&self, var: &str) -> Option<usize> {
        self.vars.binary_search_by(|v| v.as_str().cmp(var)).ok()
    }

    /// Insert, keeping the most recent derivation on collision.
    pub fn insert_latest(&mut self, row: Tuple, ts: Ts) {
        self.rows
            .entry(row)
            .and_modify(|t| *t = (*t).max(ts))
            .or_insert(ts);
    }

    /// Insert, keeping the earliest derivation on collision.
    pub fn insert_earliest(&mut self, row: Tuple, ts: Ts) {
        self.rows
            .entry(row)
            .and_modify(|t| *t = (*t).min(ts))
            .or_insert(ts);
    }

    pub fn union_latest(&mut self, other: &Table) {
        for (row, ts) in other.rows() {
            self.insert_latest(row.clone(), ts);
        }
    }

    pub fn union_earliest(&mut self, other: &Table) {
        for (row, ts) in other.rows() {
            self.insert_earliest(row.clone(), ts);
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Tuple, Ts) -> bool) {
        self.rows.retain(|row, ts| keep(row, *ts));
    }

    /// Remove the `n` rows with the oldest derivation timestamps in one pass.
    /// Ties on the cutoff timestamp go in row order. Returns how many were removed.
    pub fn evict_oldest(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        if n >= self.rows.len() {
            let removed = self.rows.len();
            self.rows.clear();
            return removed;
        }
        let mut stamps: Vec<Ts> = self.rows.values().copied().collect();
        let (_, cutoff, _) = stamps.select_nth_unstable(n - 1);
        let cutoff = *cutoff;
        let older = self.rows.values().filter(|ts| **ts < cutoff).count();
        let mut at_cutoff = n - older;
        self.rows.retain(|_, ts| {
            if *ts < cutoff {
                return false;
            }
            if *ts == cutoff && at_cutoff > 0 {
                at_cutoff -= 1;
                return false;
            }
            true
        });
        n
    }

    /// Variable lookup for one row of this table.
    pub fn binder<'a>(&'a self, row: &'a Tuple) -> impl Fn(&str) -> Option<&'a Value> + 'a {
        move |name: &str| self.column(name).and_then(|i| row.get(i))
    }

    /// Column positions of `vars` (all of which must be columns of this table).
    fn positions(&self, vars: &[Var]) -> Vec<usize> {
        vars.iter().filter_map(|v| self.column(v)).collect()
    }

    /// Projection onto `keep` (sorted, a subset of the columns). Collisions keep
    /// the most recent derivation.
    pub fn project(&self, keep: &[Var]) -> Table {
        let pos = self.positions(keep);
        let mut out = Table::empty(keep.to_vec());
        for (row, ts) in self.rows() {
            out.insert_latest(pick(row, &pos), ts);
        }
        out
    }

    /// Natural join on the shared columns. A joined row is derived at the later
    /// of its two inputs.
    pub fn join(&self, other: &Table) -> Table {
        let shared: Vec<Var> = self
            .vars
            .iter()
            .filter(|v| other.column(v).is_some())
            .cloned()
            .collect();
        let left_key = self.positions(&shared);
        let right_key = other.positions(&shared);

        let out_vars: Vec<Var> = self
            .vars
            .iter()
            .chain(other.vars.iter())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let sources: Vec<Source> = out_vars
            .iter()
            .map(|v| match self.column(v) {
                Some(i) => Source::Left(i),
                None => Source::Right(other.column(v).unwrap_or(0)),
            })
            .collect();

        let mut index: BTreeMap<Tuple, Vec<(&Tuple, Ts)>> = BTreeMap::new();
        for (row, ts) in other.rows() {
            index.entry(pick(row, &right_key)).or_default().push((row, ts));
        }

        let mut out = Table::empty(out_vars);
        for (lrow, lts) in self.rows() {
            let Some(matches) = index.get(&pick(lrow, &left_key)) else {
                continue;
            };
            for (rrow, rts) in matches {
                let row = sources
                    .iter()
                    .map(|s| match s {
                        Source::Left(i) => lrow[*i].clone(),
                        Source::Right(j) => rrow[*j].clone(),
                    })
                    .collect();
                out.insert_latest(row, lts.max(*rts));
            }
        }
        out
    }

    /// Rows of `self` whose projection onto `other`'s columns is absent from
    /// `other`. `other`'s columns must be a subset of `self`'s.
    pub fn anti_join(&self, other: &Table) -> Table {
        let key = self.positions(&other.vars);
        let mut out = Table::empty(self.vars.clone());
        for (row, ts) in self.rows() {
            if !other.contains(&pick(row, &key)) {
                out.rows.insert(row.clone(), ts);
            }
        }
        out
    }

    /// Rows as variable maps, in row order.
    pub fn assignments(&self) -> Vec<BTreeMap<Var, Value>> {
        self.rows
            .keys()
            .map(|row| self.vars.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

enum Source {
    Left(usize),
    Right(usize),
}

fn pick(row: &Tuple, positions: &[usize]) -> Tuple {
    positions.iter().map(|i| row[*i].clone()).collect()
}
