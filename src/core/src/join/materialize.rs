use std::collections::HashSet;
use std::sync::Arc;

use common_exception::{ErrorCode, Result};
use datafusion::arrow::array::{ArrayRef, RecordBatch, StringArray, new_empty_array};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::common::ScalarValue;
use geo_types::Geometry;
use geozero::ToWkt;

use crate::feature::{Feature, FeatureCollection};
use crate::join::diagnostic::Diagnostic;
use crate::join::exec::JoinMetrics;
use crate::join::option::{JoinSide, JoinType, SpatialJoinOptions};

/// Name of the retained geometry column.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Where the value of an output column comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// Attribute of the left feature with the given name.
    Left(String),
    /// Attribute of the right feature with the given name.
    Right(String),
    /// Positional id of the matched counterpart of the driver feature.
    ForeignKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    name: String,
    source: ColumnSource,
    data_type: DataType,
    /// Typed null used when the source side is absent.
    null: ScalarValue,
}

impl OutputColumn {
    fn new(name: String, source: ColumnSource, data_type: DataType) -> Self {
        let null = ScalarValue::try_from(&data_type).unwrap_or(ScalarValue::Null);
        Self {
            name,
            source,
            data_type,
            null,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ColumnSource {
        &self.source
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }
}

/// Output layout of a join: left attributes, the foreign key, right
/// attributes, then the retained geometry.
///
/// Attribute names present on both sides get the configured side suffix on
/// both sides; nothing is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSchema {
    join_type: JoinType,
    columns: Vec<OutputColumn>,
    foreign_key: String,
}

impl JoinSchema {
    pub fn try_new(
        left: &FeatureCollection, right: &FeatureCollection, options: &SpatialJoinOptions,
    ) -> Result<Self> {
        let join_type = options.join_type;
        let left_names = left.attribute_names();
        let right_names = right.attribute_names();
        let left_set: HashSet<&str> = left_names.iter().copied().collect();
        let right_set: HashSet<&str> = right_names.iter().copied().collect();

        let foreign_key = match join_type.driver_side() {
            JoinSide::Left => format!("index_{}", options.rsuffix),
            JoinSide::Right => format!("index_{}", options.lsuffix),
        };

        let mut columns = Vec::with_capacity(left_names.len() + right_names.len() + 1);
        for name in left_names {
            let output_name = if right_set.contains(name) {
                format!("{name}_{}", options.lsuffix)
            } else {
                name.to_owned()
            };
            columns.push(OutputColumn::new(
                output_name,
                ColumnSource::Left(name.to_owned()),
                infer_data_type(left, name),
            ));
        }
        columns.push(OutputColumn::new(
            foreign_key.clone(),
            ColumnSource::ForeignKey,
            DataType::UInt64,
        ));
        for name in right_names {
            let output_name = if left_set.contains(name) {
                format!("{name}_{}", options.rsuffix)
            } else {
                name.to_owned()
            };
            columns.push(OutputColumn::new(
                output_name,
                ColumnSource::Right(name.to_owned()),
                infer_data_type(right, name),
            ));
        }

        let mut seen = HashSet::with_capacity(columns.len() + 1);
        seen.insert(GEOMETRY_COLUMN);
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ErrorCode::DuplicateColumn(column.name.clone()));
            }
        }

        Ok(Self {
            join_type,
            columns,
            foreign_key,
        })
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Attribute and foreign-key columns, in output order. The geometry column
    /// always follows them.
    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }

    /// All output column names including the trailing geometry column.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|column| column.name.as_str())
            .chain(std::iter::once(GEOMETRY_COLUMN))
            .collect()
    }

    pub fn foreign_key_column(&self) -> &str {
        &self.foreign_key
    }

    /// Position of a non-geometry column within [`JoinRow::values`].
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Build one output row. At least one side must be present; ids are
    /// positional ids within the respective collections.
    pub(crate) fn materialize<'a>(
        &self, left: Option<(usize, &'a Feature)>, right: Option<(usize, &'a Feature)>,
    ) -> JoinRow<'a> {
        debug_assert!(left.is_some() || right.is_some());

        let (foreign_key, geometry) = match self.join_type.driver_side() {
            JoinSide::Left => (right.map(|(id, _)| id), left.and_then(|(_, f)| f.geometry())),
            JoinSide::Right => (left.map(|(id, _)| id), right.and_then(|(_, f)| f.geometry())),
        };

        let values = self
            .columns
            .iter()
            .map(|column| {
                let value = match &column.source {
                    ColumnSource::Left(name) => left.and_then(|(_, f)| f.attribute(name)),
                    ColumnSource::Right(name) => right.and_then(|(_, f)| f.attribute(name)),
                    ColumnSource::ForeignKey => {
                        return ScalarValue::UInt64(foreign_key.map(|id| id as u64));
                    }
                };
                match value {
                    Some(value) if !value.is_null() => value.clone(),
                    _ => column.null.clone(),
                }
            })
            .collect();

        JoinRow {
            left_id: left.map(|(id, _)| id),
            right_id: right.map(|(id, _)| id),
            foreign_key,
            values,
            geometry,
        }
    }
}

/// Column type of an attribute: the type shared by all of its non-null
/// values, `Float64` when they are mixed numerics, `Utf8` otherwise.
fn infer_data_type(collection: &FeatureCollection, name: &str) -> DataType {
    let Some(first) = collection.first_non_null(name) else {
        return DataType::Null;
    };
    let first_type = first.data_type();

    let mut all_same = true;
    let mut all_numeric = first_type.is_numeric();
    for value in collection
        .features()
        .iter()
        .filter_map(|feature| feature.attribute(name))
        .filter(|value| !value.is_null())
    {
        let data_type = value.data_type();
        all_same &= data_type == first_type;
        all_numeric &= data_type.is_numeric();
    }

    match (all_same, all_numeric) {
        (true, _) => first_type,
        (false, true) => DataType::Float64,
        (false, false) => DataType::Utf8,
    }
}

/// One output row of a spatial join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRow<'a> {
    left_id: Option<usize>,
    right_id: Option<usize>,
    foreign_key: Option<usize>,
    values: Vec<ScalarValue>,
    geometry: Option<&'a Geometry<f64>>,
}

impl<'a> JoinRow<'a> {
    pub fn left_id(&self) -> Option<usize> {
        self.left_id
    }

    pub fn right_id(&self) -> Option<usize> {
        self.right_id
    }

    /// Positional id of the matched counterpart, `None` for unmatched rows.
    pub fn foreign_key(&self) -> Option<usize> {
        self.foreign_key
    }

    /// Values aligned with [`JoinSchema::columns`].
    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    pub fn get(&self, schema: &JoinSchema, name: &str) -> Option<&ScalarValue> {
        schema.index_of(name).map(|idx| &self.values[idx])
    }

    /// The retained geometry: the left one for left and inner joins, the
    /// right one for right joins.
    pub fn geometry(&self) -> Option<&'a Geometry<f64>> {
        self.geometry
    }
}

/// Ordered rows of a completed join plus the diagnostics raised while
/// producing them.
#[derive(Debug, Clone)]
pub struct JoinResult<'a> {
    schema: Arc<JoinSchema>,
    rows: Vec<JoinRow<'a>>,
    diagnostics: Vec<Diagnostic>,
    metrics: JoinMetrics,
}

impl<'a> JoinResult<'a> {
    pub(crate) fn new(
        schema: Arc<JoinSchema>, rows: Vec<JoinRow<'a>>, diagnostics: Vec<Diagnostic>,
        metrics: JoinMetrics,
    ) -> Self {
        Self {
            schema,
            rows,
            diagnostics,
            metrics,
        }
    }

    pub fn schema(&self) -> &JoinSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[JoinRow<'a>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<JoinRow<'a>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn metrics(&self) -> &JoinMetrics {
        &self.metrics
    }

    /// All values of one non-geometry column.
    pub fn column(&self, name: &str) -> Option<Vec<&ScalarValue>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(|row| &row.values[idx]).collect())
    }

    /// Convert the result into an Arrow [`RecordBatch`] for display. The
    /// geometry column is encoded as WKT.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let columns = self.schema.columns();
        let mut fields = Vec::with_capacity(columns.len() + 1);
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);

        for (idx, column) in columns.iter().enumerate() {
            let array = if self.rows.is_empty() {
                new_empty_array(column.data_type())
            } else {
                let values = self
                    .rows
                    .iter()
                    .map(|row| coerce_value(&row.values[idx], column))
                    .collect::<Result<Vec<_>>>()?;
                ScalarValue::iter_to_array(values)?
            };
            fields.push(Field::new(column.name(), column.data_type().clone(), true));
            arrays.push(array);
        }

        let geometries = self
            .rows
            .iter()
            .map(|row| {
                row.geometry
                    .map(|geometry| geometry.to_wkt())
                    .transpose()
                    .map_err(|e| ErrorCode::Internal(format!("Failed to encode WKT: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        fields.push(Field::new(GEOMETRY_COLUMN, DataType::Utf8, true));
        arrays.push(Arc::new(StringArray::from(geometries)));

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }
}

/// Bring a value to the column type; attribute types may vary across features.
/// Values without a cast to a widened text column use their display form.
fn coerce_value(value: &ScalarValue, column: &OutputColumn) -> Result<ScalarValue> {
    if value.is_null() {
        return Ok(column.null.clone());
    }
    if value.data_type() == column.data_type {
        return Ok(value.clone());
    }
    match value.cast_to(&column.data_type) {
        Ok(value) => Ok(value),
        Err(_) if column.data_type == DataType::Utf8 => {
            Ok(ScalarValue::Utf8(Some(value.to_string())))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use datafusion::assert_batches_eq;
    use geo_types::{Coord, Point, Rect};

    use super::*;

    fn points() -> FeatureCollection {
        FeatureCollection::new(vec![
            Feature::new(Point::new(0.0, 0.0))
                .with_attribute("name", "a")
                .with_attribute("pop", 10_i64),
            Feature::new(Point::new(5.0, 5.0))
                .with_attribute("name", "b")
                .with_attribute("pop", 20_i64),
        ])
    }

    fn boxes() -> FeatureCollection {
        FeatureCollection::new(vec![
            Feature::new(Rect::new(Coord { x: -1.0, y: -1.0 }, Coord { x: 1.0, y: 1.0 }))
                .with_attribute("name", "box")
                .with_attribute("code", "B1"),
        ])
    }

    #[test]
    fn test_schema_suffixes_collisions() {
        let schema =
            JoinSchema::try_new(&points(), &boxes(), &SpatialJoinOptions::default()).unwrap();
        assert_eq!(
            schema.column_names(),
            vec!["name_left", "pop", "index_right", "name_right", "code", "geometry"]
        );
        assert_eq!(schema.foreign_key_column(), "index_right");

        let options = SpatialJoinOptions::default()
            .with_join_type(JoinType::Right)
            .with_suffixes("l", "r");
        let schema = JoinSchema::try_new(&points(), &boxes(), &options).unwrap();
        assert_eq!(
            schema.column_names(),
            vec!["name_l", "pop", "index_l", "name_r", "code", "geometry"]
        );
    }

    #[test]
    fn test_schema_rejects_reserved_names() {
        let left = FeatureCollection::new(vec![
            Feature::new(Point::new(0.0, 0.0)).with_attribute("geometry", "oops"),
        ]);
        let err = JoinSchema::try_new(&left, &boxes(), &SpatialJoinOptions::default()).unwrap_err();
        assert!(matches!(err, ErrorCode::DuplicateColumn(ref name) if name == "geometry"));

        let right = FeatureCollection::new(vec![
            Feature::new(Point::new(0.0, 0.0)).with_attribute("index_right", 1_i64),
        ]);
        let err = JoinSchema::try_new(&points(), &right, &SpatialJoinOptions::default()).unwrap_err();
        assert!(matches!(err, ErrorCode::DuplicateColumn(ref name) if name == "index_right"));

        // Suffixing "name" on the left yields a name that already exists.
        let left = FeatureCollection::new(vec![
            Feature::new(Point::new(0.0, 0.0))
                .with_attribute("name", "a")
                .with_attribute("name_left", "b"),
        ]);
        let err = JoinSchema::try_new(&left, &boxes(), &SpatialJoinOptions::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_materialize_and_record_batch() -> Result<()> {
        let left = points();
        let right = boxes();
        let schema = Arc::new(JoinSchema::try_new(
            &left,
            &right,
            &SpatialJoinOptions::default(),
        )?);

        let matched = schema.materialize(
            Some((0, &left.features()[0])),
            Some((0, &right.features()[0])),
        );
        let unmatched = schema.materialize(Some((1, &left.features()[1])), None);
        assert_eq!(matched.foreign_key(), Some(0));
        assert_eq!(unmatched.foreign_key(), None);
        assert_eq!(unmatched.right_id(), None);
        assert_eq!(
            unmatched.get(&schema, "code"),
            Some(&ScalarValue::Utf8(None))
        );
        assert_eq!(unmatched.geometry(), left.features()[1].geometry());

        let result = JoinResult::new(
            schema,
            vec![matched, unmatched],
            vec![],
            JoinMetrics::default(),
        );
        assert_eq!(
            result.column("pop").unwrap(),
            vec![&ScalarValue::Int64(Some(10)), &ScalarValue::Int64(Some(20))]
        );

        let batch = result.to_record_batch()?;
        assert_eq!(batch.num_columns(), 6);
        let geometry = batch
            .column(5)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(geometry.value(0).starts_with("POINT"));

        let attributes = batch.project(&[0, 1, 2, 3, 4])?;
        assert_batches_eq!(
            &[
                "+-----------+-----+-------------+------------+------+",
                "| name_left | pop | index_right | name_right | code |",
                "+-----------+-----+-------------+------------+------+",
                "| a         | 10  | 0           | box        | B1   |",
                "| b         | 20  |             |            |      |",
                "+-----------+-----+-------------+------------+------+",
            ],
            &[attributes]
        );
        Ok(())
    }

    #[test]
    fn test_empty_result_record_batch() -> Result<()> {
        let left = points();
        let right = boxes();
        let schema = Arc::new(JoinSchema::try_new(
            &left,
            &right,
            &SpatialJoinOptions::default().with_join_type(JoinType::Inner),
        )?);
        let result = JoinResult::new(schema, vec![], vec![], JoinMetrics::default());
        let batch = result.to_record_batch()?;
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(2).data_type(), &DataType::UInt64);
        Ok(())
    }

    #[test]
    fn test_conflicting_attribute_types_widen_to_text() -> Result<()> {
        let left = FeatureCollection::new(vec![
            Feature::new(Point::new(0.0, 0.0))
                .with_attribute("v", 1_i64)
                .with_attribute("w", 7_i64),
            Feature::new(Point::new(1.0, 1.0))
                .with_attribute("v", "abc")
                .with_attribute("w", ScalarValue::Int64(None)),
        ]);
        let right = FeatureCollection::empty();
        let schema = Arc::new(JoinSchema::try_new(
            &left,
            &right,
            &SpatialJoinOptions::default(),
        )?);
        assert_eq!(schema.columns()[0].data_type(), &DataType::Utf8);
        assert_eq!(schema.columns()[1].data_type(), &DataType::Int64);

        let rows = vec![
            schema.materialize(Some((0, &left.features()[0])), None),
            schema.materialize(Some((1, &left.features()[1])), None),
        ];
        let batch = JoinResult::new(schema, rows, vec![], JoinMetrics::default())
            .to_record_batch()?;
        assert_batches_eq!(
            &[
                "+-----+---+-------------+",
                "| v   | w | index_right |",
                "+-----+---+-------------+",
                "| 1   | 7 |             |",
                "| abc |   |             |",
                "+-----+---+-------------+",
            ],
            &[batch.project(&[0, 1, 2])?]
        );
        Ok(())
    }

    #[test]
    fn test_mixed_numeric_attribute_is_coerced() -> Result<()> {
        let left = FeatureCollection::new(vec![
            Feature::new(Point::new(0.0, 0.0)).with_attribute("v", 1.5),
            Feature::new(Point::new(1.0, 1.0)).with_attribute("v", 2_i64),
        ]);
        let right = FeatureCollection::empty();
        let schema = Arc::new(JoinSchema::try_new(
            &left,
            &right,
            &SpatialJoinOptions::default(),
        )?);
        let rows = vec![
            schema.materialize(Some((0, &left.features()[0])), None),
            schema.materialize(Some((1, &left.features()[1])), None),
        ];
        let batch = JoinResult::new(schema, rows, vec![], JoinMetrics::default())
            .to_record_batch()?;
        assert_batches_eq!(
            &[
                "+-----+-------------+",
                "| v   | index_right |",
                "+-----+-------------+",
                "| 1.5 |             |",
                "| 2.0 |             |",
                "+-----+-------------+",
            ],
            &[batch.project(&[0, 1])?]
        );
        Ok(())
    }
}
