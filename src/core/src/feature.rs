use datafusion::common::ScalarValue;
use geo_types::Geometry;
use indexmap::IndexMap;

/// Attribute row of a feature: column name to tagged scalar, in insertion
/// order.
pub type Attributes = IndexMap<String, ScalarValue>;

/// One geometry plus its attribute row.
///
/// The positional id of a feature is its index within the owning
/// [`FeatureCollection`]; it is not stored on the feature itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    geometry: Option<Geometry<f64>>,
    attributes: Attributes,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: Some(geometry.into()),
            attributes: Attributes::new(),
        }
    }

    /// A feature without geometry.
    pub fn null() -> Self {
        Self {
            geometry: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&ScalarValue> {
        self.attributes.get(name)
    }
}

/// An ordered sequence of features tagged with a coordinate-reference
/// identifier.
///
/// The tag is opaque and only ever compared for equality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    features: Vec<Feature>,
    crs: Option<String>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            crs: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Get the feature at the given positional id.
    pub fn get(&self, id: usize) -> Option<&Feature> {
        self.features.get(id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Union of attribute names across all features, in first-seen order.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: IndexMap<&str, ()> = IndexMap::new();
        for feature in &self.features {
            for name in feature.attributes.keys() {
                names.entry(name.as_str()).or_default();
            }
        }
        names.into_keys().collect()
    }

    /// First non-null value of the named attribute, used to type output
    /// columns.
    pub fn first_non_null(&self, name: &str) -> Option<&ScalarValue> {
        self.features
            .iter()
            .filter_map(|feature| feature.attribute(name))
            .find(|value| !value.is_null())
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use geo_types::Point;

    use super::*;

    #[test]
    fn test_attribute_names_union_in_first_seen_order() {
        let collection: FeatureCollection = vec![
            Feature::new(Point::new(0.0, 0.0))
                .with_attribute("name", "a")
                .with_attribute("pop", 10_i64),
            Feature::new(Point::new(1.0, 1.0))
                .with_attribute("area", 2.5)
                .with_attribute("name", "b"),
            Feature::null(),
        ]
        .into_iter()
        .collect();

        assert_eq!(collection.attribute_names(), vec!["name", "pop", "area"]);
        assert_eq!(collection.len(), 3);
        assert!(collection.get(2).unwrap().geometry().is_none());
        assert!(collection.crs().is_none());
    }

    #[test]
    fn test_first_non_null() {
        let collection = FeatureCollection::new(vec![
            Feature::new(Point::new(0.0, 0.0)).with_attribute("pop", ScalarValue::Int64(None)),
            Feature::new(Point::new(1.0, 1.0)).with_attribute("pop", 7_i64),
        ])
        .with_crs("EPSG:4326");

        assert_eq!(
            collection.first_non_null("pop"),
            Some(&ScalarValue::Int64(Some(7)))
        );
        assert_eq!(collection.first_non_null("missing"), None);
        assert_eq!(collection.crs(), Some("EPSG:4326"));
    }
}
