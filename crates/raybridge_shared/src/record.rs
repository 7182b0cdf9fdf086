//! # Record Codec
//!
//! Encodes and decodes the record stream carried by one channel chunk.
//!
//! ```text
//! ┌────────────────────────┬──────────────────────┬─────────┐
//! │ RecordHeader (16 B)    │ payload (payload_len) │ padding │ ... next record
//! │ tag|len|sequence|rsvd  │                       │ to 16 B │
//! └────────────────────────┴──────────────────────┴─────────┘
//! ```
//!
//! The writer never fails; size limits are enforced by the channel sender.
//! The reader validates every header and payload before handing a record
//! out, and stops at the first error.

use bytemuck::{bytes_of, cast_slice, pod_read_unaligned};

use crate::constants::{align_record, MAX_MATERIAL_TEXTURES, UNASSIGNED_ID};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{
    BufferUsage, CreateBuffer, CreateMaterial, CreateMesh, CreateTexture, DrawInstance, FrameEnd,
    GeometryDesc, IndexFormat, RecordHeader, RecordPayload, RecordTag, ReleaseMesh,
    ReleaseResource, WriteResource,
};

/// Size of `RecordHeader` in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<RecordHeader>();

/// Encoded size of a record with the given payload length.
#[inline]
#[must_use]
pub const fn encoded_size(payload_len: usize) -> usize {
    HEADER_SIZE + align_record(payload_len)
}

/// A decoded Channel Record.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// Create a buffer
    CreateBuffer(CreateBuffer),
    /// Create a texture
    CreateTexture(CreateTexture),
    /// Upload bytes into a resource
    WriteResource {
        /// Resource identifier
        id: u64,
        /// Destination offset in bytes
        offset: u64,
        /// Bytes to upload
        data: Vec<u8>,
    },
    /// Destroy a resource
    ReleaseResource(ReleaseResource),
    /// Create or replace a material
    CreateMaterial(Box<CreateMaterial>),
    /// Create or replace a mesh element
    CreateMesh {
        /// Mesh identifier
        mesh: u64,
        /// Element identifier
        element: u32,
        /// Geometry descriptors, at least one
        geometries: Vec<GeometryDesc>,
    },
    /// Drop a mesh element
    ReleaseMesh(ReleaseMesh),
    /// Draw an instance
    DrawInstance(DrawInstance),
    /// End of frame
    FrameEnd(FrameEnd),
}

impl Record {
    /// Returns the wire tag.
    #[must_use]
    pub const fn tag(&self) -> RecordTag {
        match self {
            Self::CreateBuffer(_) => RecordTag::CreateBuffer,
            Self::CreateTexture(_) => RecordTag::CreateTexture,
            Self::WriteResource { .. } => RecordTag::WriteResource,
            Self::ReleaseResource(_) => RecordTag::ReleaseResource,
            Self::CreateMaterial(_) => RecordTag::CreateMaterial,
            Self::CreateMesh { .. } => RecordTag::CreateMesh,
            Self::ReleaseMesh(_) => RecordTag::ReleaseMesh,
            Self::DrawInstance(_) => RecordTag::DrawInstance,
            Self::FrameEnd(_) => RecordTag::FrameEnd,
        }
    }

    /// Payload length in bytes, excluding header and padding.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Self::CreateBuffer(_) => std::mem::size_of::<CreateBuffer>(),
            Self::CreateTexture(_) => std::mem::size_of::<CreateTexture>(),
            Self::WriteResource { data, .. } => std::mem::size_of::<WriteResource>() + data.len(),
            Self::ReleaseResource(_) => std::mem::size_of::<ReleaseResource>(),
            Self::CreateMaterial(_) => std::mem::size_of::<CreateMaterial>(),
            Self::CreateMesh { geometries, .. } => {
                std::mem::size_of::<CreateMesh>() + geometries.len() * GeometryDesc::SIZE
            }
            Self::ReleaseMesh(_) => std::mem::size_of::<ReleaseMesh>(),
            Self::DrawInstance(_) => std::mem::size_of::<DrawInstance>(),
            Self::FrameEnd(_) => std::mem::size_of::<FrameEnd>(),
        }
    }

    /// Encoded size including header and padding.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        encoded_size(self.payload_len())
    }
}

/// Appends records to a growable byte buffer.
///
/// Sequence numbers restart at 0 after `reset`.
#[derive(Debug, Default)]
pub struct RecordWriter {
    buffer: Vec<u8>,
    record_count: u32,
}

impl RecordWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            record_count: 0,
        }
    }

    /// Creates an empty writer with preallocated storage.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            record_count: 0,
        }
    }

    /// Drops all records, keeping the allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.record_count = 0;
    }

    /// Encoded bytes so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of records written.
    #[inline]
    #[must_use]
    pub const fn record_count(&self) -> u32 {
        self.record_count
    }

    /// The encoded stream.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Appends a fixed-size record. Returns the bytes written.
    pub fn push<T: RecordPayload>(&mut self, payload: &T) -> usize {
        self.push_parts(T::TAG, &[bytes_of(payload)])
    }

    /// Appends a `WriteResource` record followed by `data`.
    pub fn push_write(&mut self, id: u64, offset: u64, data: &[u8]) -> usize {
        let header = WriteResource {
            id,
            offset,
            data_len: data.len() as u64,
        };
        self.push_parts(RecordTag::WriteResource, &[bytes_of(&header), data])
    }

    /// Appends a `CreateMesh` record followed by its geometry descriptors.
    pub fn push_mesh(&mut self, mesh: u64, element: u32, geometries: &[GeometryDesc]) -> usize {
        let header = CreateMesh {
            mesh,
            element,
            geometry_count: u32::try_from(geometries.len()).unwrap_or(u32::MAX),
        };
        self.push_parts(RecordTag::CreateMesh, &[bytes_of(&header), cast_slice(geometries)])
    }

    /// Appends any decoded record.
    pub fn push_record(&mut self, record: &Record) -> usize {
        match record {
            Record::CreateBuffer(payload) => self.push(payload),
            Record::CreateTexture(payload) => self.push(payload),
            Record::WriteResource { id, offset, data } => self.push_write(*id, *offset, data),
            Record::ReleaseResource(payload) => self.push(payload),
            Record::CreateMaterial(payload) => self.push(payload.as_ref()),
            Record::CreateMesh {
                mesh,
                element,
                geometries,
            } => self.push_mesh(*mesh, *element, geometries),
            Record::ReleaseMesh(payload) => self.push(payload),
            Record::DrawInstance(payload) => self.push(payload),
            Record::FrameEnd(payload) => self.push(payload),
        }
    }

    fn push_parts(&mut self, tag: RecordTag, parts: &[&[u8]]) -> usize {
        let payload_len: usize = parts.iter().map(|part| part.len()).sum();
        let header = RecordHeader {
            tag: tag as u32,
            payload_len: u32::try_from(payload_len).unwrap_or(u32::MAX),
            sequence: self.record_count,
            reserved: 0,
        };

        let start = self.buffer.len();
        self.buffer.extend_from_slice(bytes_of(&header));
        for part in parts {
            self.buffer.extend_from_slice(part);
        }
        self.buffer.resize(start + encoded_size(payload_len), 0);
        self.record_count += 1;

        self.buffer.len() - start
    }
}

/// Decodes the records of one chunk in FIFO order.
///
/// Yields exactly `record_count` records, then checks that no bytes are
/// left over. After the first error the iterator is exhausted.
#[derive(Debug)]
pub struct RecordReader<'a> {
    bytes: &'a [u8],
    position: usize,
    record_count: u32,
    next_sequence: u32,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over `bytes` expecting `record_count` records.
    #[must_use]
    pub const fn new(bytes: &'a [u8], record_count: u32) -> Self {
        Self {
            bytes,
            position: 0,
            record_count,
            next_sequence: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Records not yet decoded.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.record_count - self.next_sequence
    }

    fn read_next(&mut self) -> ProtocolResult<Record> {
        let offset = self.position;
        let remaining = self.bytes.len() - offset;
        if remaining < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: self.record_count,
                found: self.next_sequence,
            });
        }

        let header: RecordHeader = pod_read_unaligned(&self.bytes[offset..offset + HEADER_SIZE]);
        let tag = RecordTag::from_u32(header.tag).ok_or(ProtocolError::UnknownTag {
            tag: header.tag,
            offset,
        })?;
        if header.sequence != self.next_sequence {
            return Err(ProtocolError::OutOfOrder {
                expected: self.next_sequence,
                found: header.sequence,
            });
        }
        if header.reserved != 0 {
            return Err(ProtocolError::ReservedField(offset));
        }

        let len = header.payload_len as usize;
        let available = remaining - HEADER_SIZE;
        if align_record(len) > available {
            return Err(ProtocolError::LengthOutOfRange {
                tag,
                len,
                remaining: available,
                offset,
            });
        }

        let body = offset + HEADER_SIZE;
        let record = decode_payload(tag, &self.bytes[body..body + len])?;

        self.position = body + align_record(len);
        self.next_sequence += 1;
        Ok(record)
    }
}

impl Iterator for RecordReader<'_> {
    type Item = ProtocolResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if self.next_sequence == self.record_count {
            if self.position != self.bytes.len() {
                self.failed = true;
                return Some(Err(ProtocolError::TrailingBytes(
                    self.bytes.len() - self.position,
                )));
            }
            return None;
        }

        let result = self.read_next();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

fn size_mismatch(tag: RecordTag, expected: usize, actual: usize) -> ProtocolError {
    ProtocolError::PayloadSizeMismatch {
        tag,
        expected,
        actual,
    }
}

fn read_fixed<T: RecordPayload>(payload: &[u8]) -> ProtocolResult<T> {
    let expected = std::mem::size_of::<T>();
    if payload.len() != expected {
        return Err(size_mismatch(T::TAG, expected, payload.len()));
    }
    Ok(pod_read_unaligned(payload))
}

fn read_prefix<T: RecordPayload>(payload: &[u8]) -> ProtocolResult<(T, &[u8])> {
    let size = std::mem::size_of::<T>();
    if payload.len() < size {
        return Err(size_mismatch(T::TAG, size, payload.len()));
    }
    let (head, tail) = payload.split_at(size);
    Ok((pod_read_unaligned(head), tail))
}

fn decode_payload(tag: RecordTag, payload: &[u8]) -> ProtocolResult<Record> {
    let record = match tag {
        RecordTag::CreateBuffer => {
            let buffer: CreateBuffer = read_fixed(payload)?;
            let usage_ok = BufferUsage::from_bits(buffer.usage).is_some_and(|usage| !usage.is_empty());
            if buffer.id == UNASSIGNED_ID
                || buffer.byte_size == 0
                || !usage_ok
                || IndexFormat::from_u32(buffer.index_format).is_none()
            {
                return Err(ProtocolError::InvalidBuffer(buffer.id));
            }
            Record::CreateBuffer(buffer)
        }
        RecordTag::CreateTexture => {
            let texture: CreateTexture = read_fixed(payload)?;
            texture.validate()?;
            Record::CreateTexture(texture)
        }
        RecordTag::WriteResource => {
            let (header, data): (WriteResource, _) = read_prefix(payload)?;
            let header_size = std::mem::size_of::<WriteResource>();
            if usize::try_from(header.data_len).ok() != Some(data.len()) {
                let claimed = usize::try_from(header.data_len).unwrap_or(usize::MAX);
                return Err(size_mismatch(
                    tag,
                    header_size.saturating_add(claimed),
                    payload.len(),
                ));
            }
            if header.id == UNASSIGNED_ID {
                return Err(ProtocolError::UnassignedId(tag));
            }
            Record::WriteResource {
                id: header.id,
                offset: header.offset,
                data: data.to_vec(),
            }
        }
        RecordTag::ReleaseResource => {
            let release: ReleaseResource = read_fixed(payload)?;
            if release.id == UNASSIGNED_ID {
                return Err(ProtocolError::UnassignedId(tag));
            }
            Record::ReleaseResource(release)
        }
        RecordTag::CreateMaterial => {
            let material: CreateMaterial = read_fixed(payload)?;
            if material.id == UNASSIGNED_ID {
                return Err(ProtocolError::UnassignedId(tag));
            }
            if material.texture_count as usize > MAX_MATERIAL_TEXTURES {
                return Err(ProtocolError::InvalidMaterial {
                    id: material.id,
                    count: material.texture_count,
                });
            }
            Record::CreateMaterial(Box::new(material))
        }
        RecordTag::CreateMesh => {
            let (header, tail): (CreateMesh, _) = read_prefix(payload)?;
            let expected = (header.geometry_count as usize).saturating_mul(GeometryDesc::SIZE);
            if header.geometry_count == 0 || tail.len() != expected {
                return Err(size_mismatch(
                    tag,
                    std::mem::size_of::<CreateMesh>().saturating_add(expected),
                    payload.len(),
                ));
            }
            if header.mesh == UNASSIGNED_ID {
                return Err(ProtocolError::UnassignedId(tag));
            }
            let geometries: Vec<GeometryDesc> = tail
                .chunks_exact(GeometryDesc::SIZE)
                .map(pod_read_unaligned)
                .collect();
            for geometry in &geometries {
                geometry.validate()?;
            }
            Record::CreateMesh {
                mesh: header.mesh,
                element: header.element,
                geometries,
            }
        }
        RecordTag::ReleaseMesh => Record::ReleaseMesh(read_fixed(payload)?),
        RecordTag::DrawInstance => Record::DrawInstance(read_fixed(payload)?),
        RecordTag::FrameEnd => Record::FrameEnd(read_fixed(payload)?),
    };
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ATTRIBUTE_ABSENT;
    use crate::protocol::IDENTITY_TRANSFORM;

    fn geometry() -> GeometryDesc {
        GeometryDesc {
            index_buffer: 1,
            vertex_buffer: 2,
            material: 3,
            index_count: 3,
            vertex_count: 3,
            vertex_stride: 12,
            ..GeometryDesc::default()
        }
    }

    fn decode_all(writer: &RecordWriter) -> ProtocolResult<Vec<Record>> {
        RecordReader::new(writer.as_bytes(), writer.record_count()).collect()
    }

    #[test]
    fn test_fifo_order_preserved() {
        let mut writer = RecordWriter::new();
        writer.push(&CreateBuffer {
            id: 1,
            byte_size: 36,
            usage: BufferUsage::INDEX.bits(),
            index_format: IndexFormat::U32 as u32,
        });
        writer.push_write(1, 0, &[7u8; 5]);
        writer.push_mesh(10, 0, &[geometry()]);
        for mesh in 0..4 {
            writer.push(&DrawInstance {
                mesh,
                ..DrawInstance::default()
            });
        }
        writer.push(&FrameEnd {
            frame: 1,
            ..FrameEnd::default()
        });

        let records = decode_all(&writer).unwrap();
        assert_eq!(records.len(), 8);
        assert_eq!(records[0].tag(), RecordTag::CreateBuffer);
        assert_eq!(
            records[1],
            Record::WriteResource {
                id: 1,
                offset: 0,
                data: vec![7; 5]
            }
        );
        for (index, record) in records[3..7].iter().enumerate() {
            match record {
                Record::DrawInstance(draw) => assert_eq!(draw.mesh, index as u64),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(records[7].tag(), RecordTag::FrameEnd);
    }

    #[test]
    fn test_empty_chunk() {
        let writer = RecordWriter::new();
        assert!(decode_all(&writer).unwrap().is_empty());
    }

    #[test]
    fn test_records_are_aligned() {
        let mut writer = RecordWriter::new();
        let written = writer.push_write(5, 0, &[1, 2, 3]);
        assert_eq!(written, 48); // 16 header + align(24 + 3)
        assert_eq!(writer.len() % 16, 0);
        assert_eq!(writer.push(&ReleaseResource { id: 5 }), 32);
    }

    #[test]
    fn test_encoded_len_matches_writer() {
        let record = Record::CreateMesh {
            mesh: 1,
            element: 2,
            geometries: vec![geometry(), geometry()],
        };
        let mut writer = RecordWriter::new();
        assert_eq!(writer.push_record(&record), record.encoded_len());
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let mut writer = RecordWriter::new();
        writer.push(&ReleaseResource { id: 9 });
        let mut bytes = writer.as_bytes().to_vec();
        bytes[0] = 0x42;

        let mut reader = RecordReader::new(&bytes, 1);
        assert!(matches!(
            reader.next(),
            Some(Err(ProtocolError::UnknownTag { tag: 0x42, offset: 0 }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_length_out_of_range() {
        let mut writer = RecordWriter::new();
        writer.push(&ReleaseResource { id: 9 });
        let mut bytes = writer.as_bytes().to_vec();
        bytes[4..8].copy_from_slice(&4096u32.to_le_bytes());

        let result: ProtocolResult<Vec<Record>> = RecordReader::new(&bytes, 1).collect();
        assert!(matches!(result, Err(ProtocolError::LengthOutOfRange { .. })));
    }

    #[test]
    fn test_sequence_gap_is_rejected() {
        let mut writer = RecordWriter::new();
        writer.push(&ReleaseResource { id: 1 });
        writer.push(&ReleaseResource { id: 2 });
        let mut bytes = writer.as_bytes().to_vec();
        // Second header starts at 32
        bytes[40..44].copy_from_slice(&5u32.to_le_bytes());

        let result: ProtocolResult<Vec<Record>> = RecordReader::new(&bytes, 2).collect();
        assert_eq!(
            result,
            Err(ProtocolError::OutOfOrder {
                expected: 1,
                found: 5
            })
        );
    }

    #[test]
    fn test_count_mismatch() {
        let mut writer = RecordWriter::new();
        writer.push(&ReleaseResource { id: 1 });

        let truncated: ProtocolResult<Vec<Record>> =
            RecordReader::new(writer.as_bytes(), 2).collect();
        assert!(matches!(truncated, Err(ProtocolError::Truncated { expected: 2, found: 1 })));

        let trailing: ProtocolResult<Vec<Record>> =
            RecordReader::new(writer.as_bytes(), 0).collect();
        assert_eq!(trailing, Err(ProtocolError::TrailingBytes(32)));
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        let mut bad = geometry();
        bad.normal_offset = 12; // stride is 12
        let mut writer = RecordWriter::new();
        writer.push_mesh(1, 0, &[bad]);
        assert!(matches!(decode_all(&writer), Err(ProtocolError::InvalidGeometry(_))));

        let mut ok = geometry();
        ok.normal_offset = ATTRIBUTE_ABSENT;
        let mut writer = RecordWriter::new();
        writer.push_mesh(1, 0, &[ok]);
        assert!(decode_all(&writer).is_ok());
    }

    #[test]
    fn test_mesh_without_geometry_is_rejected() {
        let mut writer = RecordWriter::new();
        writer.push_mesh(1, 0, &[]);
        assert!(matches!(
            decode_all(&writer),
            Err(ProtocolError::PayloadSizeMismatch { tag: RecordTag::CreateMesh, .. })
        ));
    }

    #[test]
    fn test_invalid_buffer_usage() {
        let mut writer = RecordWriter::new();
        writer.push(&CreateBuffer {
            id: 4,
            byte_size: 16,
            usage: 0,
            index_format: 0,
        });
        assert_eq!(decode_all(&writer), Err(ProtocolError::InvalidBuffer(4)));

        let mut writer = RecordWriter::new();
        writer.push(&CreateBuffer {
            id: 4,
            byte_size: 0,
            usage: BufferUsage::VERTEX.bits(),
            index_format: 0,
        });
        assert_eq!(decode_all(&writer), Err(ProtocolError::InvalidBuffer(4)));
    }

    #[test]
    fn test_invalid_texture_is_rejected() {
        let texture = CreateTexture {
            id: 3,
            width: 4,
            height: 4,
            levels: 3,
            texel_size: 4,
        };
        let mut writer = RecordWriter::new();
        writer.push(&texture);
        assert_eq!(decode_all(&writer), Ok(vec![Record::CreateTexture(texture)]));

        for bad in [
            CreateTexture { id: UNASSIGNED_ID, ..texture },
            CreateTexture { width: 0, ..texture },
            CreateTexture { height: 0, ..texture },
            CreateTexture { texel_size: 0, ..texture },
            CreateTexture { levels: 33, ..texture },
            CreateTexture { levels: u32::MAX, ..texture },
        ] {
            let mut writer = RecordWriter::new();
            writer.push(&bad);
            assert!(
                matches!(decode_all(&writer), Err(ProtocolError::InvalidTexture { .. })),
                "{bad:?} decoded"
            );
        }
    }

    #[test]
    fn test_unassigned_ids_are_rejected() {
        let mut writer = RecordWriter::new();
        writer.push(&ReleaseResource { id: UNASSIGNED_ID });
        assert_eq!(
            decode_all(&writer),
            Err(ProtocolError::UnassignedId(RecordTag::ReleaseResource))
        );

        let mut writer = RecordWriter::new();
        writer.push_write(UNASSIGNED_ID, 0, &[1, 2, 3]);
        assert_eq!(
            decode_all(&writer),
            Err(ProtocolError::UnassignedId(RecordTag::WriteResource))
        );

        let mut writer = RecordWriter::new();
        writer.push(&CreateMaterial::default());
        assert_eq!(
            decode_all(&writer),
            Err(ProtocolError::UnassignedId(RecordTag::CreateMaterial))
        );

        let mut writer = RecordWriter::new();
        writer.push_mesh(UNASSIGNED_ID, 0, &[geometry()]);
        assert_eq!(
            decode_all(&writer),
            Err(ProtocolError::UnassignedId(RecordTag::CreateMesh))
        );
    }

    #[test]
    fn test_material_texture_count_is_bounded() {
        let mut material = CreateMaterial {
            id: 6,
            texture_count: MAX_MATERIAL_TEXTURES as u32,
            ..CreateMaterial::default()
        };
        let mut writer = RecordWriter::new();
        writer.push(&material);
        assert!(decode_all(&writer).is_ok());

        material.texture_count += 1;
        let mut writer = RecordWriter::new();
        writer.push(&material);
        assert_eq!(
            decode_all(&writer),
            Err(ProtocolError::InvalidMaterial { id: 6, count: 17 })
        );
    }

    #[test]
    fn test_draw_round_trip_keeps_transform() {
        let mut transform = IDENTITY_TRANSFORM;
        transform[0][3] = 5.0;
        let draw = DrawInstance {
            transform,
            mesh: 3,
            element: 1,
            reserved: 0,
        };
        let mut writer = RecordWriter::new();
        writer.push(&draw);
        assert_eq!(decode_all(&writer).unwrap(), vec![Record::DrawInstance(draw)]);
    }
}
