//! Argument list expansion.
//!
//! Keyword arguments named by the directives are distributed over a list of
//! complete argument maps, while every other argument is repeated verbatim:
//!
//! - outer product: Cartesian product in nested-loop order (first slot
//!   varies slowest, last slot fastest)
//! - parallel outer slots: several arguments advancing together as one slot
//! - inner product: element-wise zip with singleton broadcast
//!
//! Outer expansion runs first; when both are requested the outer columns
//! join the inner zip as additional fixed-length columns.

use serde_json::Value;
use tracing::debug;

use crate::directive::{Expansion, OuterSlot};
use crate::error::ExpandError;
use crate::ArgMap;

/// One expanded argument: a name and one value per generated call.
#[derive(Debug)]
struct Column {
    name: String,
    values: Vec<Value>,
}

/// Resolved outer slot: the names it covers and one row of values per
/// position, each row holding one value per name.
struct Slot<'a> {
    names: &'a [String],
    rows: Vec<Vec<&'a Value>>,
}

/// Expand `kwargs` into a list of argument maps according to `expansion`.
///
/// Without any named directive the result is `[kwargs]`, unchanged.
pub fn expand_arguments(kwargs: &ArgMap, expansion: &Expansion) -> Result<Vec<ArgMap>, ExpandError> {
    if !expansion.names_anything() {
        return Ok(vec![kwargs.clone()]);
    }
    let (inner, outer) = expansion.resolve()?;

    let mut columns = Vec::new();
    let mut length = 1;

    if !outer.is_empty() {
        let (outer_columns, product_len) = outer_product(kwargs, &outer, &inner)?;
        columns = outer_columns;
        length = product_len;
    }

    if !inner.is_empty() {
        for name in &inner {
            if columns.iter().any(|c: &Column| &c.name == name) {
                continue;
            }
            if let Some(value) = kwargs.get(name) {
                columns.push(Column {
                    name: name.clone(),
                    values: as_sequence(name, value)?.clone(),
                });
            }
        }
        if !columns.is_empty() {
            length = inner_zip(&mut columns)?;
        }
    }

    let arg_maps: Vec<ArgMap> = (0..length)
        .map(|n| {
            let mut args = kwargs.clone();
            for column in &columns {
                args.insert(column.name.clone(), column.values[n].clone());
            }
            args
        })
        .collect();

    debug!(
        combinations = arg_maps.len(),
        inner = inner.len(),
        outer = outer.len(),
        "expanded argument list"
    );
    Ok(arg_maps)
}

fn as_sequence<'a>(name: &str, value: &'a Value) -> Result<&'a Vec<Value>, ExpandError> {
    value
        .as_array()
        .ok_or_else(|| ExpandError::not_a_sequence(name))
}

/// Build the Cartesian product over all outer slots. Returns one column per
/// outer argument (parallel groups already transposed back) and the product
/// length.
fn outer_product(
    kwargs: &ArgMap,
    outer: &[OuterSlot],
    inner: &[String],
) -> Result<(Vec<Column>, usize), ExpandError> {
    let mut slots: Vec<Slot<'_>> = Vec::with_capacity(outer.len());

    for slot in outer {
        match slot {
            OuterSlot::Single(name) => {
                // inner arguments and missing arguments are not outer candidates
                if inner.contains(name) {
                    continue;
                }
                let Some(value) = kwargs.get(name) else {
                    continue;
                };
                let rows = as_sequence(name, value)?.iter().map(|v| vec![v]).collect();
                slots.push(Slot {
                    names: std::slice::from_ref(name),
                    rows,
                });
            }
            OuterSlot::Parallel(names) => slots.push(parallel_slot(kwargs, names, inner)?),
        }
    }

    let length: usize = slots.iter().map(|s| s.rows.len()).product();
    let mut columns: Vec<Column> = slots
        .iter()
        .flat_map(|s| s.names.iter())
        .map(|name| Column {
            name: name.clone(),
            values: Vec::with_capacity(length),
        })
        .collect();

    let mut picks = vec![0usize; slots.len()];
    for combination in 0..length {
        let mut remainder = combination;
        for (pick, slot) in picks.iter_mut().zip(&slots).rev() {
            *pick = remainder % slot.rows.len();
            remainder /= slot.rows.len();
        }
        let mut column = 0;
        for (pick, slot) in picks.iter().zip(&slots) {
            for value in &slot.rows[*pick] {
                columns[column].values.push((*value).clone());
                column += 1;
            }
        }
    }

    Ok((columns, length))
}

fn parallel_slot<'a>(
    kwargs: &'a ArgMap,
    names: &'a [String],
    inner: &[String],
) -> Result<Slot<'a>, ExpandError> {
    if names.is_empty() {
        return Err(ExpandError::Configuration(
            "parallel expansion group must name at least one argument".to_string(),
        ));
    }
    let sequences = names
        .iter()
        .map(|name| {
            if inner.contains(name) {
                return Err(ExpandError::Configuration(format!(
                    "argument '{name}' is listed for both inner and parallel outer expansion"
                )));
            }
            let value = kwargs.get(name).ok_or_else(|| {
                ExpandError::Configuration(format!(
                    "parallel expansion argument '{name}' was not supplied"
                ))
            })?;
            as_sequence(name, value)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let length = sequences[0].len();
    if let Some((name, seq)) = names
        .iter()
        .zip(&sequences)
        .find(|(_, seq)| seq.len() != length)
    {
        return Err(ExpandError::LengthMismatch {
            context: format!("parallel expansion group ({})", names.join(", ")),
            detail: format!(
                "'{}' has {} values but '{}' has {}",
                names[0],
                length,
                name,
                seq.len()
            ),
        });
    }

    let rows = (0..length)
        .map(|i| sequences.iter().copied().map(|seq| &seq[i]).collect())
        .collect();
    Ok(Slot { names, rows })
}

/// Zip columns element-wise, broadcasting singletons. Returns the common
/// length.
fn inner_zip(columns: &mut [Column]) -> Result<usize, ExpandError> {
    let length = columns
        .iter()
        .map(|c| c.values.len())
        .find(|&len| len != 1)
        .unwrap_or(1);

    for column in columns.iter_mut() {
        match column.values.len() {
            len if len == length => {}
            1 => {
                let value = column.values[0].clone();
                column.values = vec![value; length];
            }
            len => {
                return Err(ExpandError::LengthMismatch {
                    context: "inner expansion".to_string(),
                    detail: format!(
                        "'{}' has {} values, expected {} (or 1)",
                        column.name, len, length
                    ),
                })
            }
        }
    }
    Ok(length)
}
