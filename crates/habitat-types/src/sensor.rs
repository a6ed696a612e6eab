//! Sensor descriptors, reading schemas, and the known sensor type table.
//!
//! A [`SensorDescriptor`] identifies one producer: its physical kind, a
//! stable ID unique within the deployment, and the [`ReadingSchema`] that
//! labels the fields its readings carry. Descriptors for sensors that
//! announce themselves only through a transport address (MQTT topics, log
//! file names) are synthesized from the closed [`SensorType`] table.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;
use validator::Validate;

/// Map of `sensor_id` to descriptor, as sent in the `sensor-info` event.
pub type ProducerMap = BTreeMap<String, SensorDescriptor>;

/// Display label and unit for one reading field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FieldInfo {
    /// Human-readable label (e.g. "Temperature").
    pub label: String,
    /// Unit suffix (e.g. "°C"). Empty for dimensionless counts.
    #[serde(default)]
    pub unit: String,
}

impl FieldInfo {
    /// Create a field description from a label and a unit.
    pub fn new(label: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
        }
    }
}

/// Ordered mapping of field name to [`FieldInfo`].
///
/// Serialized as a JSON object whose key order is the insertion order, so
/// dashboards render fields in the order the sensor declared them.
/// Inserting an existing name replaces its info in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadingSchema {
    fields: Vec<(String, FieldInfo)>,
}

impl ReadingSchema {
    /// Create an empty schema.
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with_field(mut self, name: &str, label: &str, unit: &str) -> Self {
        self.insert(name.to_owned(), FieldInfo::new(label, unit));
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, name: String, info: FieldInfo) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = info;
        } else {
            self.fields.push((name, info));
        }
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, info)| info)
    }

    /// Whether the schema declares `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldInfo)> {
        self.fields.iter().map(|(n, info)| (n.as_str(), info))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for ReadingSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, info) in &self.fields {
            map.serialize_entry(name, info)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ReadingSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = ReadingSchema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field name to {label, unit}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut schema = ReadingSchema::new();
                while let Some((name, info)) = access.next_entry::<String, FieldInfo>()? {
                    schema.insert(name, info);
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// Static metadata identifying one producer.
///
/// Re-registering a descriptor with an existing `sensor_id` replaces the
/// previous one. `reading_info` is accepted as an alias for
/// `reading_schema` on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SensorDescriptor {
    /// Physical or logical kind (e.g. "BME688", "Mock").
    #[validate(length(min = 1, max = 64))]
    pub sensor_type: String,
    /// Optional human label.
    #[serde(default)]
    #[validate(length(max = 128))]
    pub sensor_name: Option<String>,
    /// Stable identifier, unique within one deployment.
    #[validate(length(min = 1, max = 128))]
    pub sensor_id: String,
    /// Optional free-text description.
    #[serde(default)]
    #[validate(length(max = 512))]
    pub sensor_desc: Option<String>,
    /// Fields a reading from this sensor may carry.
    #[serde(alias = "reading_info")]
    #[ts(type = "Record<string, FieldInfo>")]
    pub reading_schema: ReadingSchema,
}

impl SensorDescriptor {
    /// Synthesize a descriptor for a sensor known only by host and type name.
    ///
    /// The ID is `{host}.{type_name}`. Known types get their schema from
    /// the [`SensorType`] table and their canonical type name; unknown
    /// types keep the given name and get an empty schema.
    pub fn synthesized(host: &str, type_name: &str) -> Self {
        let sensor_id = sensor_id_for(host, type_name);
        let known = SensorType::from_name(type_name);
        Self {
            sensor_type: known.map_or_else(|| type_name.to_owned(), |t| t.as_str().to_owned()),
            sensor_name: Some(sensor_id.clone()),
            sensor_desc: Some(format!("{type_name} sensor on {host}")),
            reading_schema: known.map(SensorType::schema).unwrap_or_default(),
            sensor_id,
        }
    }
}

/// Derive the stable producer ID for a sensor on a host.
pub fn sensor_id_for(host: &str, sensor: &str) -> String {
    format!("{host}.{sensor}")
}

/// Closed set of sensor types with a known reading schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    /// Bosch BME688 gas/environment sensor.
    Bme688,
    /// Bosch BMP388 barometric pressure sensor.
    Bmp388,
    /// Bosch BNO085 orientation sensor.
    Bno085,
    /// Sensirion SCD30 CO2 sensor.
    Scd30,
    /// Sensirion SCD4x CO2 sensor.
    Scd4x,
    /// Sensirion SGP30 air quality sensor.
    Sgp30,
    /// AMS TSL2591 light sensor.
    Tsl2591,
    /// Vishay VEML7700 ambient light sensor.
    Veml7700,
    /// Vernier Go Direct CO2 sensor.
    VernierCo2,
    /// Vernier Go Direct O2 sensor.
    VernierO2,
    /// Vernier Go Direct weather station.
    VernierWthr,
    /// Software sensor producing random-walk values.
    Mock,
}

impl SensorType {
    /// Every known sensor type.
    pub const ALL: [Self; 12] = [
        Self::Bme688,
        Self::Bmp388,
        Self::Bno085,
        Self::Scd30,
        Self::Scd4x,
        Self::Sgp30,
        Self::Tsl2591,
        Self::Veml7700,
        Self::VernierCo2,
        Self::VernierO2,
        Self::VernierWthr,
        Self::Mock,
    ];

    /// Canonical type name as it appears in descriptors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bme688 => "BME688",
            Self::Bmp388 => "BMP388",
            Self::Bno085 => "BNO085",
            Self::Scd30 => "SCD30",
            Self::Scd4x => "SCD4X",
            Self::Sgp30 => "SGP30",
            Self::Tsl2591 => "TSL2591",
            Self::Veml7700 => "VEML7700",
            Self::VernierCo2 => "VernierCO2",
            Self::VernierO2 => "VernierO2",
            Self::VernierWthr => "VernierWTHR",
            Self::Mock => "Mock",
        }
    }

    /// Case-insensitive lookup by type name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }

    /// The reading schema for this sensor type.
    pub fn schema(self) -> ReadingSchema {
        let schema = ReadingSchema::new();
        match self {
            Self::Bme688 => schema
                .with_field("temp", "Temperature", "°C")
                .with_field("rel_hum", "Relative Humidity", "%")
                .with_field("gas_resistance", "Gas Resistance", "Ohms")
                .with_field("altitude", "Altitude", "m")
                .with_field("pressure", "Pressure", "hPa"),
            Self::Bmp388 => schema
                .with_field("temperature", "Temperature", "°C")
                .with_field("pressure", "Pressure", "hPa")
                .with_field("altitude", "Altitude", "m"),
            Self::Bno085 => schema
                .with_field("linear_accel_x", "Linear Acceleration X", "m/s²")
                .with_field("linear_accel_y", "Linear Acceleration Y", "m/s²")
                .with_field("linear_accel_z", "Linear Acceleration Z", "m/s²"),
            Self::Scd30 | Self::Scd4x | Self::VernierCo2 => schema
                .with_field("co2", "CO2", "ppm")
                .with_field("temp", "Temperature", "°C")
                .with_field("rel_hum", "Relative Humidity", "%"),
            Self::Sgp30 => schema
                .with_field("H2", "Hydrogen", "ppm")
                .with_field("ethanol", "ethanol", "ppm")
                .with_field("eCO2", "eCO2", "ppm")
                .with_field("VolatileOrganicCompounds", "VOC", "ppb"),
            Self::Tsl2591 => schema
                .with_field("lux", "Illuminance", "lx")
                .with_field("visible", "Visible", "")
                .with_field("infrared", "Infrared", ""),
            Self::Veml7700 => schema.with_field("light", "Light", "lx"),
            Self::VernierO2 => schema
                .with_field("o2", "O2", "%")
                .with_field("temp", "Temperature", "°C"),
            Self::VernierWthr => schema
                .with_field("wind_speed", "Wind Speed", "m/s")
                .with_field("wind_direction", "Wind Direction", "°")
                .with_field("wind_chill", "Wind Chill", "°C")
                .with_field("temp", "Temperature", "°C")
                .with_field("heat_index", "Heat Index", "°C")
                .with_field("dew_point", "Dew Point", "°C")
                .with_field("rel_hum", "Relative Humidity", "%")
                .with_field("absolute_humidity", "Absolute Humidity", "g/m^3")
                .with_field("station_pressure", "Station Pressure", "mbar")
                .with_field("pressure", "Barometric Pressure", "mbar")
                .with_field("altitude", "Altitude", "m"),
            Self::Mock => schema
                .with_field("co2", "CO2", "ppm")
                .with_field("temperature", "Temperature", "°C")
                .with_field("humidity", "Relative Humidity", "%"),
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(SensorType::from_name("bme688"), Some(SensorType::Bme688));
        assert_eq!(SensorType::from_name("Mock"), Some(SensorType::Mock));
        assert_eq!(SensorType::from_name("vernierco2"), Some(SensorType::VernierCo2));
        assert_eq!(SensorType::from_name("dht22"), None);
    }

    #[test]
    fn every_type_has_a_schema() {
        for t in SensorType::ALL {
            assert!(!t.schema().is_empty(), "{t} has an empty schema");
        }
    }

    #[test]
    fn schema_serializes_in_declaration_order() {
        let json = serde_json::to_string(&SensorType::Bme688.schema()).unwrap_or_default();
        let temp = json.find("\"temp\"").unwrap_or(usize::MAX);
        let pressure = json.find("\"pressure\"").unwrap_or(0);
        assert!(temp < pressure);
    }

    #[test]
    fn schema_insert_replaces_in_place() {
        let mut schema = ReadingSchema::new()
            .with_field("a", "A", "")
            .with_field("b", "B", "");
        schema.insert("a".to_owned(), FieldInfo::new("Alpha", "x"));
        let names: Vec<&str> = schema.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(schema.get("a").map(|i| i.label.as_str()), Some("Alpha"));
    }

    #[test]
    fn descriptor_accepts_reading_info_alias() {
        let json = serde_json::json!({
            "sensor_type": "SCD30",
            "sensor_name": null,
            "sensor_id": "sam.host1.scd30",
            "sensor_desc": null,
            "reading_info": {
                "co2": {"label": "CO2", "unit": "ppm"}
            }
        });
        let desc: Result<SensorDescriptor, _> = serde_json::from_value(json);
        assert!(desc.is_ok());
        let desc = desc.unwrap_or_else(|_| SensorDescriptor::synthesized("x", "y"));
        assert!(desc.reading_schema.contains("co2"));
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn descriptor_requires_schema_and_id() {
        let missing_schema = serde_json::json!({"sensor_type": "Mock", "sensor_id": "a"});
        assert!(serde_json::from_value::<SensorDescriptor>(missing_schema).is_err());

        let missing_id = serde_json::json!({"sensor_type": "Mock", "reading_schema": {}});
        assert!(serde_json::from_value::<SensorDescriptor>(missing_id).is_err());
    }

    #[test]
    fn empty_id_fails_validation() {
        let mut desc = SensorDescriptor::synthesized("host1", "Mock");
        desc.sensor_id = String::new();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn synthesized_known_type() {
        let desc = SensorDescriptor::synthesized("samrpi1", "scd30");
        assert_eq!(desc.sensor_id, "samrpi1.scd30");
        assert_eq!(desc.sensor_type, "SCD30");
        assert_eq!(desc.sensor_name.as_deref(), Some("samrpi1.scd30"));
        assert_eq!(desc.sensor_desc.as_deref(), Some("scd30 sensor on samrpi1"));
        assert_eq!(desc.reading_schema, SensorType::Scd30.schema());
    }

    #[test]
    fn synthesized_unknown_type_has_empty_schema() {
        let desc = SensorDescriptor::synthesized("samrpi1", "dht22");
        assert_eq!(desc.sensor_type, "dht22");
        assert!(desc.reading_schema.is_empty());
    }
}
