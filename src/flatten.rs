//! Value flattening.
//!
//! Turns the nested, polymorphic [`Datum`] representation returned by the
//! query service into a plain JSON tree, dispatching on the paired
//! [`ColumnDescriptor`]'s type tag:
//!
//! | Column kind | Output |
//! |-------------|--------|
//! | `Scalar` | the scalar string unchanged (numbers and booleans stay strings) |
//! | `Array` | a JSON array, element order preserved |
//! | `Row` | a JSON object keyed by column name, in column order |
//! | `TimeSeries` | a JSON object keyed by point timestamp, in point order |
//!
//! Null values become the literal string `"NULL"`, not JSON `null`, so that
//! archives written by this tool keep the same shape as older ones.
//!
//! Flattening is pure and infallible. A datum whose shape disagrees with its
//! descriptor is a broken contract with the query service and panics; the
//! service adapter validates wire data before it gets here.

use serde_json::{Map, Value};

use crate::models::{ColumnDescriptor, ColumnKind, Datum, TimePoint};

/// Marker written in place of null values.
pub const NULL_MARKER: &str = "NULL";

/// One flattened result row, keyed by column name.
pub type FlattenedRow = Map<String, Value>;

/// Flatten a row's values against the page's column descriptors, by position.
///
/// Duplicate column names are not deduplicated: the later column overwrites
/// the earlier value.
pub fn flatten_row(data: &[Datum], columns: &[ColumnDescriptor]) -> FlattenedRow {
    assert_eq!(
        data.len(),
        columns.len(),
        "row has {} values but {} column descriptors",
        data.len(),
        columns.len()
    );

    let mut row = Map::with_capacity(columns.len());
    for (datum, column) in data.iter().zip(columns) {
        row.insert(column.name.clone(), flatten_datum(datum, column));
    }
    row
}

/// Flatten a single datum against its descriptor.
pub fn flatten_datum(datum: &Datum, column: &ColumnDescriptor) -> Value {
    match (&column.kind, datum) {
        (_, Datum::Null) => Value::String(NULL_MARKER.to_string()),
        (ColumnKind::Scalar(_), Datum::Scalar(value)) => Value::String(value.clone()),
        (ColumnKind::Array(element), Datum::Array(items)) => flatten_array(items, element),
        (ColumnKind::Row(columns), Datum::Row(values)) => {
            Value::Object(flatten_row(values, columns))
        }
        (ColumnKind::TimeSeries(value), Datum::TimeSeries(points)) => {
            flatten_time_series(points, value)
        }
        (kind, datum) => panic!(
            "column '{}' is tagged {} but carries a {} value",
            column.name,
            kind.name(),
            datum.kind_name()
        ),
    }
}

fn flatten_array(items: &[Datum], element: &ColumnDescriptor) -> Value {
    Value::Array(
        items
            .iter()
            .map(|item| flatten_datum(item, element))
            .collect(),
    )
}

fn flatten_time_series(points: &[TimePoint], value: &ColumnDescriptor) -> Value {
    let mut series = Map::with_capacity(points.len());
    for point in points {
        series.insert(point.time.clone(), flatten_datum(&point.value, value));
    }
    Value::Object(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn varchar(name: &str) -> ColumnDescriptor {
        ColumnDescriptor::scalar(name, "VARCHAR")
    }

    #[test]
    fn scalar_null_becomes_marker() {
        let value = flatten_datum(&Datum::Null, &varchar("measure_value::double"));
        assert_eq!(value, json!("NULL"));
    }

    #[test]
    fn scalars_are_not_coerced() {
        let column = ColumnDescriptor::scalar("cpu", "DOUBLE");
        assert_eq!(flatten_datum(&Datum::scalar("12.50"), &column), json!("12.50"));

        let column = ColumnDescriptor::scalar("ok", "BOOLEAN");
        assert_eq!(flatten_datum(&Datum::scalar("true"), &column), json!("true"));
    }

    #[test]
    fn row_zips_values_and_columns_in_order() {
        let columns = vec![
            varchar("region"),
            varchar("measure_name"),
            ColumnDescriptor::scalar("time", "TIMESTAMP"),
        ];
        let data = vec![
            Datum::scalar("eu-west-1"),
            Datum::scalar("cpu"),
            Datum::scalar("2021-06-10 12:00:00.000000000"),
        ];

        let row = flatten_row(&data, &columns);
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["region", "measure_name", "time"]);
        assert_eq!(row["measure_name"], json!("cpu"));
    }

    #[test]
    fn duplicate_column_names_last_write_wins() {
        let columns = vec![varchar("a"), varchar("a")];
        let data = vec![Datum::scalar("first"), Datum::scalar("second")];

        let row = flatten_row(&data, &columns);
        assert_eq!(row.len(), 1);
        assert_eq!(row["a"], json!("second"));
    }

    #[test]
    fn array_preserves_element_order() {
        let column = ColumnDescriptor::array("tags", varchar(""));
        let datum = Datum::Array(vec![
            Datum::scalar("c"),
            Datum::Null,
            Datum::scalar("a"),
        ]);

        assert_eq!(flatten_datum(&datum, &column), json!(["c", "NULL", "a"]));
    }

    #[test]
    fn empty_array_is_an_empty_sequence() {
        let column = ColumnDescriptor::array("tags", varchar(""));
        assert_eq!(flatten_datum(&Datum::Array(vec![]), &column), json!([]));
    }

    #[test]
    fn time_series_keys_points_by_timestamp() {
        let column = ColumnDescriptor::time_series("series", ColumnDescriptor::scalar("", "DOUBLE"));
        let datum = Datum::TimeSeries(vec![
            TimePoint {
                time: "2021-06-10 12:00:00.000000000".into(),
                value: Datum::scalar("1.0"),
            },
            TimePoint {
                time: "2021-06-10 12:01:00.000000000".into(),
                value: Datum::Null,
            },
        ]);

        let value = flatten_datum(&datum, &column);
        assert_eq!(
            value,
            json!({
                "2021-06-10 12:00:00.000000000": "1.0",
                "2021-06-10 12:01:00.000000000": "NULL",
            })
        );
    }

    #[test]
    fn time_series_of_rows_recurses() {
        let point_row = ColumnDescriptor::row("", vec![varchar("unit"), varchar("reading")]);
        let column = ColumnDescriptor::time_series("series", point_row);
        let datum = Datum::TimeSeries(vec![TimePoint {
            time: "t0".into(),
            value: Datum::Row(vec![Datum::scalar("C"), Datum::scalar("21")]),
        }]);

        assert_eq!(
            flatten_datum(&datum, &column),
            json!({ "t0": { "unit": "C", "reading": "21" } })
        );
    }

    #[test]
    fn nested_arrays_of_rows() {
        let inner = ColumnDescriptor::row("", vec![varchar("k"), varchar("v")]);
        let column = ColumnDescriptor::array("pairs", inner);
        let datum = Datum::Array(vec![
            Datum::Row(vec![Datum::scalar("x"), Datum::scalar("1")]),
            Datum::Row(vec![Datum::scalar("y"), Datum::Null]),
        ]);

        assert_eq!(
            flatten_datum(&datum, &column),
            json!([{ "k": "x", "v": "1" }, { "k": "y", "v": "NULL" }])
        );
    }

    #[test]
    #[should_panic(expected = "tagged array but carries a scalar value")]
    fn mismatched_shape_panics() {
        let column = ColumnDescriptor::array("tags", varchar(""));
        flatten_datum(&Datum::scalar("oops"), &column);
    }
}
