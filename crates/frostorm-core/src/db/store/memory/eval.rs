use super::{DatabaseState, MemoryTable, function};
use crate::{
    db::{
        sql::{
            AggregateFunction, CompareOp, Condition, Delete, Expr, FromItem, Insert, JoinKind,
            Quantifier, Select, TableColumn, Update,
        },
        store::{Row, StoreError},
    },
    value::{ArithmeticOp, Value},
};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

///
/// Binding
/// One table alias bound to one row (`None` for a null-extended outer join).
///

#[derive(Clone, Copy, Debug)]
struct Binding<'a> {
    alias: &'a str,
    table: &'a MemoryTable,
    row: Option<&'a Row>,
}

///
/// Env
/// Row bindings visible to an expression, chained to the enclosing query.
///

#[derive(Clone, Debug)]
pub(super) struct Env<'a> {
    bindings: Vec<Binding<'a>>,
    outer: Option<&'a Env<'a>>,
}

impl<'a> Env<'a> {
    fn single(alias: &'a str, table: &'a MemoryTable, row: &'a Row) -> Self {
        Self {
            bindings: vec![Binding {
                alias,
                table,
                row: Some(row),
            }],
            outer: None,
        }
    }

    fn lookup(&self, column: &TableColumn) -> Result<Value, StoreError> {
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(binding) = current.bindings.iter().find(|b| b.alias == column.alias) {
                let pos = binding.table.position(&column.column)?;
                return Ok(binding.row.map_or(Value::Null, |row| row[pos].clone()));
            }
            env = current.outer;
        }

        Err(StoreError::statement(format!(
            "column {}.{} references an unbound alias",
            column.alias, column.column
        )))
    }
}

///
/// Evaluator
///

pub(super) struct Evaluator<'s> {
    state: &'s DatabaseState,
    params: &'s [Value],
}

impl<'s> Evaluator<'s> {
    pub(super) const fn new(state: &'s DatabaseState, params: &'s [Value]) -> Self {
        Self { state, params }
    }

    pub(super) fn select<'a>(
        &'a self,
        select: &'a Select,
        outer: Option<&'a Env<'a>>,
    ) -> Result<Vec<Row>, StoreError> {
        // FROM: cross product of every item, joins applied per item
        let mut envs = vec![Env {
            bindings: Vec::new(),
            outer,
        }];
        for item in &select.from {
            let combos = self.from_item(item, outer)?;
            let mut next = Vec::with_capacity(envs.len() * combos.len());
            for env in &envs {
                for combo in &combos {
                    let mut bindings = env.bindings.clone();
                    bindings.extend(combo.iter().copied());
                    next.push(Env { bindings, outer });
                }
            }
            envs = next;
        }

        // WHERE
        let mut matched = Vec::new();
        for env in envs {
            if let Some(filter) = &select.filter
                && self.condition(filter, &env, None)? != Some(true)
            {
                continue;
            }
            matched.push(env);
        }

        // projection (grouped or per row), with sort keys alongside
        let mut output: Vec<(Row, Vec<Value>)> = Vec::new();
        let grouped = !select.group_by.is_empty()
            || select.having.is_some()
            || select.columns.iter().any(contains_aggregate);

        if grouped {
            let mut groups: Vec<Vec<Env<'a>>> = Vec::new();
            let mut index: BTreeMap<Vec<Value>, usize> = BTreeMap::new();
            for env in matched {
                let key = select
                    .group_by
                    .iter()
                    .map(|e| self.eval(e, &env, None))
                    .collect::<Result<Vec<_>, _>>()?;
                let slot = *index.entry(key).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[slot].push(env);
            }
            if groups.is_empty() && select.group_by.is_empty() {
                groups.push(Vec::new());
            }

            let empty = Env {
                bindings: Vec::new(),
                outer,
            };
            for group in &groups {
                let env = group.first().unwrap_or(&empty);
                if let Some(having) = &select.having
                    && self.condition(having, env, Some(group.as_slice()))? != Some(true)
                {
                    continue;
                }
                let row = select
                    .columns
                    .iter()
                    .map(|c| self.eval(c, env, Some(group.as_slice())))
                    .collect::<Result<Vec<_>, _>>()?;
                let keys = select
                    .order_by
                    .iter()
                    .map(|o| self.eval(&o.expr, env, Some(group.as_slice())))
                    .collect::<Result<Vec<_>, _>>()?;
                output.push((row, keys));
            }
        } else {
            for env in &matched {
                let row = select
                    .columns
                    .iter()
                    .map(|c| self.eval(c, env, None))
                    .collect::<Result<Vec<_>, _>>()?;
                let keys = select
                    .order_by
                    .iter()
                    .map(|o| self.eval(&o.expr, env, None))
                    .collect::<Result<Vec<_>, _>>()?;
                output.push((row, keys));
            }
        }

        // ORDER BY (stable), DISTINCT, OFFSET/LIMIT
        if !select.order_by.is_empty() {
            output.sort_by(|(_, a), (_, b)| {
                for ((x, y), order) in a.iter().zip(b).zip(&select.order_by) {
                    let ord = x.canonical_cmp(y);
                    let ord = if order.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let mut rows: Vec<Row> = output.into_iter().map(|(row, _)| row).collect();
        if select.distinct {
            let mut seen = BTreeSet::new();
            rows.retain(|row| seen.insert(row.clone()));
        }

        let offset = usize::try_from(select.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = select
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    fn from_item<'a>(
        &'a self,
        item: &'a FromItem,
        outer: Option<&'a Env<'a>>,
    ) -> Result<Vec<Vec<Binding<'a>>>, StoreError> {
        let root = self.state.table(&item.table.table)?;
        let mut combos: Vec<Vec<Binding<'a>>> = root
            .rows
            .iter()
            .map(|row| {
                vec![Binding {
                    alias: &item.table.alias,
                    table: root,
                    row: Some(row),
                }]
            })
            .collect();

        for join in &item.joins {
            let table = self.state.table(&join.table.table)?;
            let mut next = Vec::new();

            for combo in combos {
                let mut found = false;
                for row in &table.rows {
                    let mut bindings = combo.clone();
                    bindings.push(Binding {
                        alias: &join.table.alias,
                        table,
                        row: Some(row),
                    });
                    let env = Env { bindings, outer };
                    if self.condition(&join.on, &env, None)? == Some(true) {
                        found = true;
                        next.push(env.bindings);
                    }
                }
                if !found && join.kind == JoinKind::Left {
                    let mut bindings = combo;
                    bindings.push(Binding {
                        alias: &join.table.alias,
                        table,
                        row: None,
                    });
                    next.push(bindings);
                }
            }
            combos = next;
        }

        Ok(combos)
    }

    pub(super) fn eval(
        &self,
        expr: &Expr,
        env: &Env<'_>,
        group: Option<&[Env<'_>]>,
    ) -> Result<Value, StoreError> {
        match expr {
            Expr::Column(column) => env.lookup(column),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(index) => self.params.get(*index).cloned().ok_or_else(|| {
                StoreError::statement(format!("no value bound for parameter slot {index}"))
            }),
            Expr::Function { function, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, env, group))
                    .collect::<Result<Vec<_>, _>>()?;
                function::apply(*function, &values)
            }
            Expr::Aggregate {
                function,
                distinct,
                arg,
            } => {
                let Some(rows) = group else {
                    return Err(StoreError::statement(format!(
                        "{} used outside of a grouped select",
                        function.name()
                    )));
                };
                self.aggregate(*function, *distinct, arg.as_deref(), rows)
            }
            Expr::Arithmetic(chain) => {
                let mut acc = self.eval(&chain.first, env, group)?;
                for (op, operand) in &chain.rest {
                    let rhs = self.eval(operand, env, group)?;
                    acc = op.apply(&acc, &rhs)?;
                }
                Ok(acc)
            }
            Expr::Negate(inner) => Ok(self.eval(inner, env, group)?.negate()?),
            Expr::Subquery(select) => {
                let rows = self.select(select, Some(env))?;
                if rows.len() > 1 {
                    return Err(StoreError::statement(
                        "scalar sub-select returned more than one row",
                    ));
                }
                Ok(rows
                    .into_iter()
                    .next()
                    .and_then(|row| row.into_iter().next())
                    .unwrap_or(Value::Null))
            }
        }
    }

    fn aggregate(
        &self,
        function: AggregateFunction,
        distinct: bool,
        arg: Option<&Expr>,
        rows: &[Env<'_>],
    ) -> Result<Value, StoreError> {
        let Some(arg) = arg else {
            return Ok(Value::Int(i64::try_from(rows.len()).unwrap_or(i64::MAX)));
        };

        let mut values = Vec::new();
        for env in rows {
            let value = self.eval(arg, env, None)?;
            if !value.is_null() {
                values.push(value);
            }
        }
        if distinct {
            let mut seen = BTreeSet::new();
            values.retain(|v| seen.insert(v.clone()));
        }

        let value = match function {
            AggregateFunction::Count => Value::Int(i64::try_from(values.len()).unwrap_or(i64::MAX)),
            AggregateFunction::Sum => {
                let mut acc: Option<Value> = None;
                for value in &values {
                    acc = Some(match acc {
                        None => value.clone(),
                        Some(sum) => ArithmeticOp::Add.apply(&sum, value)?,
                    });
                }
                acc.unwrap_or(Value::Null)
            }
            AggregateFunction::Avg => {
                if values.is_empty() {
                    Value::Null
                } else {
                    let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
                    #[expect(clippy::cast_precision_loss)]
                    let count = values.len() as f64;
                    Value::Float(sum / count)
                }
            }
            AggregateFunction::Min => values
                .into_iter()
                .min_by(Value::canonical_cmp)
                .unwrap_or(Value::Null),
            AggregateFunction::Max => values
                .into_iter()
                .max_by(Value::canonical_cmp)
                .unwrap_or(Value::Null),
        };

        Ok(value)
    }

    /// Three-valued condition: `None` is SQL unknown.
    pub(super) fn condition(
        &self,
        condition: &Condition,
        env: &Env<'_>,
        group: Option<&[Env<'_>]>,
    ) -> Result<Option<bool>, StoreError> {
        let result = match condition {
            Condition::Compare { left, op, right } => {
                let left = self.eval(left, env, group)?;
                let right = self.eval(right, env, group)?;
                compare(*op, &left, &right)
            }
            Condition::Quantified {
                left,
                op,
                quantifier,
                select,
            } => {
                let left = self.eval(left, env, group)?;
                let rows = self.select(select, Some(env))?;
                let results = rows
                    .iter()
                    .map(|row| compare(*op, &left, row.first().unwrap_or(&Value::Null)));
                match quantifier {
                    Quantifier::All => all3(results),
                    Quantifier::Any => any3(results),
                }
            }
            Condition::IsNull { expr, negated } => {
                Some(self.eval(expr, env, group)?.is_null() != *negated)
            }
            Condition::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = self.eval(expr, env, group)?;
                let low = self.eval(low, env, group)?;
                let high = self.eval(high, env, group)?;
                let inside = all3([
                    compare(CompareOp::Gte, &value, &low),
                    compare(CompareOp::Lte, &value, &high),
                ]);
                negate_if(inside, *negated)
            }
            Condition::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.eval(expr, env, group)?;
                let items = list
                    .iter()
                    .map(|e| self.eval(e, env, group))
                    .collect::<Result<Vec<_>, _>>()?;
                negate_if(in3(&value, &items), *negated)
            }
            Condition::InSelect {
                expr,
                select,
                negated,
            } => {
                let value = self.eval(expr, env, group)?;
                let items: Vec<Value> = self
                    .select(select, Some(env))?
                    .into_iter()
                    .map(|row| row.into_iter().next().unwrap_or(Value::Null))
                    .collect();
                negate_if(in3(&value, &items), *negated)
            }
            Condition::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let value = self.eval(expr, env, group)?;
                let pattern = self.eval(pattern, env, group)?;
                let escape = match escape {
                    Some(e) => self.eval(e, env, group)?,
                    None => Value::Null,
                };
                let matched = match (&value, &pattern) {
                    (Value::Text(text), Value::Text(pattern)) => Some(like_match(
                        text,
                        pattern,
                        escape.as_text().and_then(|s| s.chars().next()),
                    )),
                    (Value::Null, _) | (_, Value::Null) => None,
                    _ => {
                        return Err(StoreError::statement(format!(
                            "LIKE requires text operands, got {value} and {pattern}"
                        )));
                    }
                };
                negate_if(matched, *negated)
            }
            Condition::Exists { select, negated } => {
                Some(self.select(select, Some(env))?.is_empty() == *negated)
            }
            Condition::Truth(expr) => self.eval(expr, env, group)?.as_bool(),
            Condition::And(parts) => {
                let mut result = Some(true);
                for part in parts {
                    match self.condition(part, env, group)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Condition::Or(parts) => {
                let mut result = Some(false);
                for part in parts {
                    match self.condition(part, env, group)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Condition::Not(inner) => self.condition(inner, env, group)?.map(|b| !b),
        };

        Ok(result)
    }
}

///
/// DML
///

/// Fill a missing identity value, or advance the counter past an explicit one.
pub(super) fn assign_identity(table: &mut MemoryTable, row: &mut Row) -> Value {
    let Some(pos) = table.identity else {
        return Value::Null;
    };
    match row[pos].as_int() {
        Some(explicit) => table.next_identity = table.next_identity.max(explicit),
        None => {
            table.next_identity = table.next_identity.saturating_add(1);
            row[pos] = Value::Int(table.next_identity);
        }
    }

    row[pos].clone()
}

pub(super) fn insert(
    state: &mut DatabaseState,
    insert: &Insert,
    params: &[Value],
) -> Result<Value, StoreError> {
    let values = {
        let evaluator = Evaluator::new(state, params);
        let env = Env {
            bindings: Vec::new(),
            outer: None,
        };
        insert
            .values
            .iter()
            .map(|e| evaluator.eval(e, &env, None))
            .collect::<Result<Vec<_>, _>>()?
    };

    let table = state.table_mut(&insert.table)?;
    if insert.columns.len() != values.len() {
        return Err(StoreError::statement(format!(
            "insert into '{}' lists {} columns but {} values",
            table.name,
            insert.columns.len(),
            values.len()
        )));
    }

    let mut row = vec![Value::Null; table.columns.len()];
    for (column, value) in insert.columns.iter().zip(values) {
        let pos = table.position(column)?;
        row[pos] = value;
    }

    let mut generated = assign_identity(table, &mut row);
    if generated.is_null()
        && let Some(column) = &insert.generated_key
    {
        generated = row[table.position(column)?].clone();
    }

    table.check_row(&row, None)?;
    table.rows.push(row);

    Ok(generated)
}

pub(super) fn update(
    state: &mut DatabaseState,
    update: &Update,
    params: &[Value],
) -> Result<u64, StoreError> {
    let changes = {
        let evaluator = Evaluator::new(state, params);
        let table = state.table(&update.table.table)?;
        let positions = update
            .assignments
            .iter()
            .map(|a| table.position(&a.column))
            .collect::<Result<Vec<_>, _>>()?;

        let mut changes = Vec::new();
        for (i, row) in table.rows.iter().enumerate() {
            let env = Env::single(&update.table.alias, table, row);
            if let Some(filter) = &update.filter
                && evaluator.condition(filter, &env, None)? != Some(true)
            {
                continue;
            }
            let mut new_row = row.clone();
            for (pos, assignment) in positions.iter().zip(&update.assignments) {
                new_row[*pos] = evaluator.eval(&assignment.value, &env, None)?;
            }
            changes.push((i, new_row));
        }
        changes
    };

    let table = state.table_mut(&update.table.table)?;
    for (i, row) in &changes {
        table.check_row(row, Some(*i))?;
    }
    let count = changes.len();
    for (i, row) in changes {
        table.rows[i] = row;
    }

    Ok(u64::try_from(count).unwrap_or(u64::MAX))
}

pub(super) fn delete(
    state: &mut DatabaseState,
    delete: &Delete,
    params: &[Value],
) -> Result<u64, StoreError> {
    let doomed = {
        let evaluator = Evaluator::new(state, params);
        let table = state.table(&delete.table.table)?;

        let mut doomed = BTreeSet::new();
        for (i, row) in table.rows.iter().enumerate() {
            let env = Env::single(&delete.table.alias, table, row);
            let hit = match &delete.filter {
                Some(filter) => evaluator.condition(filter, &env, None)? == Some(true),
                None => true,
            };
            if hit {
                doomed.insert(i);
            }
        }
        doomed
    };

    let table = state.table_mut(&delete.table.table)?;
    let mut index = 0;
    table.rows.retain(|_| {
        let keep = !doomed.contains(&index);
        index += 1;
        keep
    });

    Ok(u64::try_from(doomed.len()).unwrap_or(u64::MAX))
}

///
/// Three-valued helpers
///

fn compare(op: CompareOp, left: &Value, right: &Value) -> Option<bool> {
    left.sql_cmp(right).map(|ord| match op {
        CompareOp::Eq => ord.is_eq(),
        CompareOp::Ne => ord.is_ne(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Lte => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Gte => ord.is_ge(),
    })
}

fn all3(results: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
    let mut result = Some(true);
    for r in results {
        match r {
            Some(false) => return Some(false),
            None => result = None,
            Some(true) => {}
        }
    }
    result
}

fn any3(results: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
    let mut result = Some(false);
    for r in results {
        match r {
            Some(true) => return Some(true),
            None => result = None,
            Some(false) => {}
        }
    }
    result
}

fn in3(value: &Value, items: &[Value]) -> Option<bool> {
    if value.is_null() {
        return None;
    }
    any3(items.iter().map(|item| value.sql_eq(item)))
}

fn negate_if(result: Option<bool>, negated: bool) -> Option<bool> {
    if negated { result.map(|b| !b) } else { result }
}

fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Aggregate { .. } => true,
        Expr::Function { args, .. } => args.iter().any(contains_aggregate),
        Expr::Arithmetic(chain) => {
            contains_aggregate(&chain.first) || chain.rest.iter().any(|(_, e)| contains_aggregate(e))
        }
        Expr::Negate(inner) => contains_aggregate(inner),
        Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) | Expr::Subquery(_) => false,
    }
}

#[derive(Clone, Copy)]
enum LikeToken {
    Any,
    One,
    Literal(char),
}

/// SQL LIKE: `%` matches any run, `_` one character; `escape` quotes the
/// next pattern character.
pub(crate) fn like_match(text: &str, pattern: &str, escape: Option<char>) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            if let Some(next) = chars.next() {
                tokens.push(LikeToken::Literal(next));
            }
            continue;
        }
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            other => LikeToken::Literal(other),
        });
    }

    let text: Vec<char> = text.chars().collect();
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;

    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::Any => {
                let mut seen = false;
                for (j, slot) in next.iter_mut().enumerate() {
                    seen |= reachable[j];
                    *slot = seen;
                }
            }
            LikeToken::One => {
                for j in 1..=text.len() {
                    next[j] = reachable[j - 1];
                }
            }
            LikeToken::Literal(c) => {
                for j in 1..=text.len() {
                    next[j] = reachable[j - 1] && text[j - 1] == c;
                }
            }
        }
        reachable = next;
    }

    reachable[text.len()]
}
