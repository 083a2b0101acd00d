//! # Kernel BTF Layout Lookup
//!
//! The lifecycle programs read `current->real_parent->tgid` and
//! `current->exit_code`, whose offsets differ between kernel builds. This
//! module reads just enough of the kernel's BTF (`/sys/kernel/btf/vmlinux`)
//! to find those member offsets, which the loader then writes to the
//! `TASK_LAYOUT` map.
//!
//! Only the type section is walked. Struct and union members are kept; every
//! other kind is skipped by size. Anonymous struct/union members are searched
//! recursively, since `task_struct` nests some of its fields that way.

use plainsight_common::TaskLayout;

use crate::domain::BtfError;

pub const VMLINUX_BTF: &str = "/sys/kernel/btf/vmlinux";

const BTF_MAGIC: u16 = 0xeb9f;
const HEADER_LEN: usize = 24;
const TYPE_LEN: usize = 12;

const KIND_INT: u32 = 1;
const KIND_PTR: u32 = 2;
const KIND_ARRAY: u32 = 3;
const KIND_STRUCT: u32 = 4;
const KIND_UNION: u32 = 5;
const KIND_ENUM: u32 = 6;
const KIND_FWD: u32 = 7;
const KIND_TYPEDEF: u32 = 8;
const KIND_VOLATILE: u32 = 9;
const KIND_CONST: u32 = 10;
const KIND_RESTRICT: u32 = 11;
const KIND_FUNC: u32 = 12;
const KIND_FUNC_PROTO: u32 = 13;
const KIND_VAR: u32 = 14;
const KIND_DATASEC: u32 = 15;
const KIND_FLOAT: u32 = 16;
const KIND_DECL_TAG: u32 = 17;
const KIND_TYPE_TAG: u32 = 18;
const KIND_ENUM64: u32 = 19;

/// Anonymous members nest only a few levels deep in practice
const MAX_NESTING: usize = 8;

#[derive(Debug, Clone)]
struct Member {
    name_off: u32,
    type_id: u32,
    bit_offset: u32,
}

#[derive(Debug, Clone)]
enum TypeKind {
    Composite(Vec<Member>),
    /// typedef / const / volatile / restrict / type tag, pointing at `u32`
    Alias(u32),
    Other,
}

#[derive(Debug, Clone)]
struct BtfType {
    name_off: u32,
    is_struct: bool,
    kind: TypeKind,
}

/// Parsed BTF type graph
#[derive(Debug)]
pub struct Btf {
    /// Index 0 stands in for `void`
    types: Vec<BtfType>,
    strings: Vec<u8>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn u32(&mut self, what: &'static str) -> Result<u32, BtfError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(BtfError::Truncated(what))?;
        self.pos += 4;
        Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn skip(&mut self, len: usize, what: &'static str) -> Result<(), BtfError> {
        if self.pos + len > self.data.len() {
            return Err(BtfError::Truncated(what));
        }
        self.pos += len;
        Ok(())
    }
}

impl Btf {
    /// Read the running kernel's BTF.
    ///
    /// # Errors
    /// [`BtfError::Unavailable`] when the file cannot be read, otherwise any
    /// parse error from [`Btf::parse`].
    pub fn from_sys_fs() -> Result<Self, BtfError> {
        let data = std::fs::read(VMLINUX_BTF)?;
        Self::parse(&data)
    }

    /// Parse a raw BTF blob in native byte order.
    ///
    /// # Errors
    /// Returns [`BtfError`] for a wrong magic, truncated sections or an
    /// unknown type kind.
    pub fn parse(data: &[u8]) -> Result<Self, BtfError> {
        if data.len() < HEADER_LEN {
            return Err(BtfError::Truncated("header"));
        }
        let magic = u16::from_ne_bytes([data[0], data[1]]);
        if magic != BTF_MAGIC {
            return Err(BtfError::BadMagic(magic));
        }

        let mut header = Cursor { data, pos: 4 };
        let hdr_len = header.u32("header")? as usize;
        let type_off = header.u32("header")? as usize;
        let type_len = header.u32("header")? as usize;
        let str_off = header.u32("header")? as usize;
        let str_len = header.u32("header")? as usize;

        let types_start = hdr_len + type_off;
        let type_data = data
            .get(types_start..types_start + type_len)
            .ok_or(BtfError::Truncated("type section"))?;
        let strings_start = hdr_len + str_off;
        let strings = data
            .get(strings_start..strings_start + str_len)
            .ok_or(BtfError::Truncated("string section"))?
            .to_vec();

        let mut types =
            vec![BtfType { name_off: 0, is_struct: false, kind: TypeKind::Other }];
        let mut cursor = Cursor { data: type_data, pos: 0 };
        while cursor.pos < type_data.len() {
            types.push(Self::parse_type(&mut cursor)?);
        }

        Ok(Self { types, strings })
    }

    fn parse_type(cursor: &mut Cursor<'_>) -> Result<BtfType, BtfError> {
        let name_off = cursor.u32("type")?;
        let info = cursor.u32("type")?;
        let size_or_type = cursor.u32("type")?;

        let kind = (info >> 24) & 0x1f;
        let vlen = (info & 0xffff) as usize;
        let bitfield_offsets = info >> 31 == 1;

        let parsed = match kind {
            KIND_STRUCT | KIND_UNION => {
                let mut members = Vec::with_capacity(vlen);
                for _ in 0..vlen {
                    let member_name = cursor.u32("member")?;
                    let type_id = cursor.u32("member")?;
                    let offset = cursor.u32("member")?;
                    let bit_offset = if bitfield_offsets { offset & 0x00ff_ffff } else { offset };
                    members.push(Member { name_off: member_name, type_id, bit_offset });
                }
                TypeKind::Composite(members)
            }
            KIND_TYPEDEF | KIND_VOLATILE | KIND_CONST | KIND_RESTRICT | KIND_TYPE_TAG => {
                TypeKind::Alias(size_or_type)
            }
            KIND_INT | KIND_VAR | KIND_DECL_TAG => {
                cursor.skip(4, "type data")?;
                TypeKind::Other
            }
            KIND_ARRAY => {
                cursor.skip(12, "array")?;
                TypeKind::Other
            }
            KIND_ENUM | KIND_FUNC_PROTO => {
                cursor.skip(vlen * 8, "enum")?;
                TypeKind::Other
            }
            KIND_DATASEC | KIND_ENUM64 => {
                cursor.skip(vlen * 12, "datasec")?;
                TypeKind::Other
            }
            KIND_PTR | KIND_FWD | KIND_FUNC | KIND_FLOAT | 0 => TypeKind::Other,
            other => return Err(BtfError::UnknownKind(other)),
        };

        Ok(BtfType { name_off, is_struct: kind == KIND_STRUCT, kind: parsed })
    }

    fn name(&self, offset: u32) -> &str {
        let rest = self.strings.get(offset as usize..).unwrap_or_default();
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        std::str::from_utf8(&rest[..end]).unwrap_or_default()
    }

    /// Id of the first complete struct called `name`
    #[must_use]
    pub fn struct_by_name(&self, name: &str) -> Option<u32> {
        self.types
            .iter()
            .position(|t| {
                t.is_struct
                    && matches!(t.kind, TypeKind::Composite(_))
                    && self.name(t.name_off) == name
            })
            .and_then(|id| u32::try_from(id).ok())
    }

    /// Follow typedefs and qualifiers to the underlying type
    fn resolve(&self, mut id: u32) -> Option<&BtfType> {
        for _ in 0..MAX_NESTING {
            let ty = self.types.get(id as usize)?;
            match ty.kind {
                TypeKind::Alias(target) => id = target,
                _ => return Some(ty),
            }
        }
        None
    }

    fn find_member_bits(&self, type_id: u32, member: &str, depth: usize) -> Option<u32> {
        if depth > MAX_NESTING {
            return None;
        }
        let TypeKind::Composite(members) = &self.resolve(type_id)?.kind else {
            return None;
        };

        for m in members {
            let name = self.name(m.name_off);
            if name == member {
                return Some(m.bit_offset);
            }
            if name.is_empty() {
                if let Some(inner) = self.find_member_bits(m.type_id, member, depth + 1) {
                    return Some(m.bit_offset + inner);
                }
            }
        }
        None
    }

    /// Byte offset of `member` in `struct strukt`, looking through
    /// anonymous struct and union members.
    ///
    /// # Errors
    /// Returns [`BtfError`] when the struct or member does not exist or the
    /// member is a bitfield that does not start on a byte.
    pub fn member_offset(&self, strukt: &str, member: &str) -> Result<u32, BtfError> {
        let id = self
            .struct_by_name(strukt)
            .ok_or_else(|| BtfError::StructNotFound(strukt.to_string()))?;
        let bits = self.find_member_bits(id, member, 0).ok_or_else(|| {
            BtfError::MemberNotFound { strukt: strukt.to_string(), member: member.to_string() }
        })?;
        if bits % 8 != 0 {
            return Err(BtfError::Unaligned(member.to_string()));
        }
        Ok(bits / 8)
    }
}

/// Offsets of the `task_struct` members the lifecycle programs read.
///
/// # Errors
/// Returns [`BtfError`] if any of the members cannot be located.
pub fn resolve_task_layout(btf: &Btf) -> Result<TaskLayout, BtfError> {
    Ok(TaskLayout {
        real_parent: btf.member_offset("task_struct", "real_parent")?,
        tgid: btf.member_offset("task_struct", "tgid")?,
        exit_code: btf.member_offset("task_struct", "exit_code")?,
        resolved: 1,
    })
}
