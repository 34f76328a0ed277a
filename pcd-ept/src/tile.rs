use byteorder::{ByteOrder as _, LittleEndian};

use crate::{
    error::{EptError, Result},
    key::TileKey,
    metadata::{
        Dimension, ScalarType, Schema, COLOR_DIMENSIONS, NORMAL_DIMENSIONS, POSITION_DIMENSIONS,
    },
};

/// Points decoded from one tile. Optional attributes are present only when
/// the schema declares them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TilePoints {
    pub positions: Vec<[f32; 3]>,
    pub colors: Option<Vec<[u8; 3]>>,
    pub normals: Option<Vec<[f32; 3]>>,
}

impl TilePoints {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Field {
    offset: usize,
    scalar: ScalarType,
    size: u32,
    scale: f64,
    shift: f64,
}

impl Field {
    fn new(dimension: &Dimension, offset: usize) -> Result<Self> {
        let supported = match dimension.scalar {
            ScalarType::Floating => matches!(dimension.size, 4 | 8),
            ScalarType::Unsigned | ScalarType::Signed => matches!(dimension.size, 1 | 2 | 4 | 8),
        };
        if !supported {
            return Err(EptError::UnsupportedDimension {
                name: dimension.name.clone(),
                scalar: dimension.scalar,
                size: dimension.size,
            });
        }
        Ok(Self {
            offset,
            scalar: dimension.scalar,
            size: dimension.size,
            scale: dimension.scale.unwrap_or(1.0),
            shift: dimension.offset.unwrap_or(0.0),
        })
    }

    fn read(&self, record: &[u8]) -> f64 {
        let bytes = &record[self.offset..self.offset + self.size as usize];
        let raw = match (self.scalar, self.size) {
            (ScalarType::Floating, 4) => LittleEndian::read_f32(bytes) as f64,
            (ScalarType::Floating, _) => LittleEndian::read_f64(bytes),
            (ScalarType::Unsigned, 1) => bytes[0] as f64,
            (ScalarType::Unsigned, 2) => LittleEndian::read_u16(bytes) as f64,
            (ScalarType::Unsigned, 4) => LittleEndian::read_u32(bytes) as f64,
            (ScalarType::Unsigned, _) => LittleEndian::read_u64(bytes) as f64,
            (ScalarType::Signed, 1) => bytes[0] as i8 as f64,
            (ScalarType::Signed, 2) => LittleEndian::read_i16(bytes) as f64,
            (ScalarType::Signed, 4) => LittleEndian::read_i32(bytes) as f64,
            (ScalarType::Signed, _) => LittleEndian::read_i64(bytes) as f64,
        };
        raw * self.scale + self.shift
    }

    fn write(&self, value: f64, record: &mut [u8]) {
        let raw = (value - self.shift) / self.scale;
        let bytes = &mut record[self.offset..self.offset + self.size as usize];
        match (self.scalar, self.size) {
            (ScalarType::Floating, 4) => LittleEndian::write_f32(bytes, raw as f32),
            (ScalarType::Floating, _) => LittleEndian::write_f64(bytes, raw),
            (ScalarType::Unsigned, 1) => bytes[0] = raw.round() as u8,
            (ScalarType::Unsigned, 2) => LittleEndian::write_u16(bytes, raw.round() as u16),
            (ScalarType::Unsigned, 4) => LittleEndian::write_u32(bytes, raw.round() as u32),
            (ScalarType::Unsigned, _) => LittleEndian::write_u64(bytes, raw.round() as u64),
            (ScalarType::Signed, 1) => bytes[0] = raw.round() as i8 as u8,
            (ScalarType::Signed, 2) => LittleEndian::write_i16(bytes, raw.round() as i16),
            (ScalarType::Signed, 4) => LittleEndian::write_i32(bytes, raw.round() as i32),
            (ScalarType::Signed, _) => LittleEndian::write_i64(bytes, raw.round() as i64),
        }
    }

    /// Channel value scaled to 8 bits; 16-bit colors are common in EPT.
    fn read_channel(&self, record: &[u8]) -> u8 {
        let value = self.read(record);
        if self.size == 1 {
            value.clamp(0.0, 255.0) as u8
        } else {
            (value / 257.0).round().clamp(0.0, 255.0) as u8
        }
    }
}

fn triple(schema: &Schema, names: [&str; 3]) -> Result<Option<[Field; 3]>> {
    if !names.iter().all(|n| schema.contains(n)) {
        return Ok(None);
    }
    let mut fields = Vec::with_capacity(3);
    for name in names {
        let offset = schema
            .offset_of(name)
            .ok_or_else(|| EptError::MissingDimension(name.to_string()))?;
        let dimension = schema
            .dimensions()
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| EptError::MissingDimension(name.to_string()))?;
        fields.push(Field::new(dimension, offset)?);
    }
    Ok(Some([fields[0], fields[1], fields[2]]))
}

/// Byte layout of one point record, derived from a schema.
#[derive(Debug, Clone)]
pub struct TileLayout {
    record_size: usize,
    position: [Field; 3],
    color: Option<[Field; 3]>,
    normal: Option<[Field; 3]>,
}

impl TileLayout {
    pub fn from_schema(schema: &Schema) -> Result<Self> {
        for name in POSITION_DIMENSIONS {
            if !schema.contains(name) {
                return Err(EptError::MissingDimension(name.to_string()));
            }
        }
        let position = triple(schema, POSITION_DIMENSIONS)?
            .ok_or_else(|| EptError::MissingDimension("X".to_string()))?;

        Ok(Self {
            record_size: schema.record_size(),
            position,
            color: triple(schema, COLOR_DIMENSIONS)?,
            normal: triple(schema, NORMAL_DIMENSIONS)?,
        })
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn has_colors(&self) -> bool {
        self.color.is_some()
    }

    pub fn has_normals(&self) -> bool {
        self.normal.is_some()
    }

    /// Number of whole records in `len` bytes; a remainder is corruption.
    pub fn point_count(&self, key: &TileKey, len: usize) -> Result<usize> {
        if self.record_size == 0 || len % self.record_size != 0 {
            return Err(EptError::CorruptTile {
                key: key.to_string(),
                len,
                record_size: self.record_size,
            });
        }
        Ok(len / self.record_size)
    }

    pub fn decode(&self, key: &TileKey, bytes: &[u8]) -> Result<TilePoints> {
        let count = self.point_count(key, bytes.len())?;
        let mut points = TilePoints {
            positions: Vec::with_capacity(count),
            colors: self.color.map(|_| Vec::with_capacity(count)),
            normals: self.normal.map(|_| Vec::with_capacity(count)),
        };

        for record in bytes.chunks_exact(self.record_size) {
            points
                .positions
                .push(self.position.map(|f| f.read(record) as f32));
            if let (Some(fields), Some(colors)) = (&self.color, points.colors.as_mut()) {
                colors.push(fields.map(|f| f.read_channel(record)));
            }
            if let (Some(fields), Some(normals)) = (&self.normal, points.normals.as_mut()) {
                normals.push(fields.map(|f| f.read(record) as f32));
            }
        }

        Ok(points)
    }

    /// Writes one record per position. Attributes in the schema but absent
    /// from `points` are zero-filled.
    pub fn encode(&self, points: &TilePoints) -> Vec<u8> {
        let mut buffer = vec![0u8; points.len() * self.record_size];
        for (i, record) in buffer.chunks_exact_mut(self.record_size).enumerate() {
            for (field, value) in self.position.iter().zip(points.positions[i]) {
                field.write(value as f64, record);
            }
            if let (Some(fields), Some(colors)) = (&self.color, &points.colors) {
                for (field, value) in fields.iter().zip(colors[i]) {
                    field.write(value as f64, record);
                }
            }
            if let (Some(fields), Some(normals)) = (&self.normal, &points.normals) {
                for (field, value) in fields.iter().zip(normals[i]) {
                    field.write(value as f64, record);
                }
            }
        }
        buffer
    }
}
