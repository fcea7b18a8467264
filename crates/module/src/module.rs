//! Decoded view of a wasm binary.
//!
//! Only the parts the split analysis looks at are materialized: section
//! sizes, imports, tables, element segments, the debug function names and
//! the raw function bodies. Bodies are disassembled on request.

use cranelift_entity::PrimaryMap;
use wasmparser::{
    CustomSectionReader, Element, ElementItems, ElementKind, FunctionBody, KnownCustom, Name,
    Operator, Parser, Payload, RefType, TableType, TypeRef,
};

use crate::{inst::decode_operators, CodeIndex, DecodeError, FuncIndex, Instruction};

/// A top level section and its payload size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
    pub id: u8,
    /// Well-known name for standard sections, the section's own name for
    /// custom ones.
    pub name: &'a str,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Function import with its type index.
    Func(u32),
    Table,
    Memory,
    Global,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Import<'a> {
    pub module: &'a str,
    pub field: &'a str,
    pub kind: ImportKind,
}

impl Import<'_> {
    pub fn is_func(&self) -> bool {
        matches!(self.kind, ImportKind::Func(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableElement {
    FuncRef,
    ExternRef,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDesc {
    pub element: TableElement,
    pub initial: u64,
    pub maximum: Option<u64>,
}

impl TableDesc {
    fn new(ty: &TableType) -> Self {
        let element = if ty.element_type.is_func_ref() {
            TableElement::FuncRef
        } else if ty.element_type == RefType::EXTERNREF {
            TableElement::ExternRef
        } else {
            TableElement::Other
        };

        Self {
            element,
            initial: u64::from(ty.initial),
            maximum: ty.maximum.map(u64::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    Active {
        table: u32,
        /// Offset expression, including its terminating `end`.
        offset: Vec<Instruction>,
    },
    Passive,
    Declared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    pub kind: SegmentKind,
    /// One entry per item; `None` is a `ref.null`.
    pub funcs: Vec<Option<FuncIndex>>,
}

/// Contents of the `name` custom section that the analysis consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSection<'a> {
    functions: Option<Vec<(u32, &'a str)>>,
}

impl<'a> NameSection<'a> {
    fn decode(reader: &CustomSectionReader<'a>) -> Result<Self, DecodeError> {
        let KnownCustom::Name(names) = reader.as_known() else {
            return Ok(Self::default());
        };

        let mut functions = None;
        for name in names {
            if let Name::Function(map) = name? {
                let mut entries = Vec::new();
                for naming in map {
                    let naming = naming?;
                    entries.push((naming.index, naming.name));
                }
                functions = Some(entries);
            }
        }

        Ok(Self { functions })
    }

    /// Raw `(function index, name)` pairs, or `None` when the section has no
    /// function-name subsection.
    pub fn functions(&self) -> Option<&[(u32, &'a str)]> {
        self.functions.as_deref()
    }
}

pub struct Module<'a> {
    bytes: &'a [u8],
    sections: Vec<Section<'a>>,
    imports: Vec<Import<'a>>,
    tables: Vec<TableDesc>,
    elements: Vec<ElementSegment>,
    bodies: PrimaryMap<CodeIndex, FunctionBody<'a>>,
    names: Option<NameSection<'a>>,
}

impl<'a> Module<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let mut module = Self {
            bytes,
            sections: Vec::new(),
            imports: Vec::new(),
            tables: Vec::new(),
            elements: Vec::new(),
            bodies: PrimaryMap::new(),
            names: None,
        };

        for payload in Parser::new(0).parse_all(bytes) {
            let payload = payload?;

            if let Some((id, range)) = payload.as_section() {
                let name = match &payload {
                    Payload::CustomSection(reader) => reader.name(),
                    _ => section_name(id),
                };
                module.sections.push(Section {
                    id,
                    name,
                    size: range.len(),
                });
            }

            match payload {
                Payload::ImportSection(reader) => {
                    for import in reader {
                        module.push_import(import?);
                    }
                }

                Payload::TableSection(reader) => {
                    for table in reader {
                        module.tables.push(TableDesc::new(&table?.ty));
                    }
                }

                Payload::ElementSection(reader) => {
                    for element in reader {
                        let segment = module.elements.len();
                        let element = module.decode_element(segment, element?)?;
                        module.elements.push(element);
                    }
                }

                Payload::CodeSectionEntry(body) => {
                    module.bodies.push(body);
                }

                Payload::CustomSection(reader) if reader.name() == "name" => {
                    module.names = Some(NameSection::decode(&reader)?);
                }

                _ => {}
            }
        }

        tracing::debug!(
            sections = module.sections.len(),
            imports = module.imports.len(),
            bodies = module.bodies.len(),
            "decoded module"
        );
        Ok(module)
    }

    fn push_import(&mut self, import: wasmparser::Import<'a>) {
        let kind = match import.ty {
            TypeRef::Func(ty) => ImportKind::Func(ty),
            TypeRef::Table(ty) => {
                // Imported tables precede defined ones in the table index space.
                self.tables.push(TableDesc::new(&ty));
                ImportKind::Table
            }
            TypeRef::Memory(_) => ImportKind::Memory,
            TypeRef::Global(_) => ImportKind::Global,
            TypeRef::Tag(_) => ImportKind::Tag,
        };

        self.imports.push(Import {
            module: import.module,
            field: import.name,
            kind,
        });
    }

    fn decode_element(
        &self,
        segment: usize,
        element: Element<'a>,
    ) -> Result<ElementSegment, DecodeError> {
        let kind = match element.kind {
            ElementKind::Active {
                table_index,
                offset_expr,
            } => {
                let reader = offset_expr.get_operators_reader();
                let base = reader.original_position();
                SegmentKind::Active {
                    table: table_index.unwrap_or(0),
                    offset: decode_operators(reader, self.bytes, base)?,
                }
            }
            ElementKind::Passive => SegmentKind::Passive,
            ElementKind::Declared => SegmentKind::Declared,
        };

        let mut funcs = Vec::new();
        match element.items {
            ElementItems::Functions(reader) => {
                for func in reader {
                    funcs.push(Some(FuncIndex::from_u32(func?)));
                }
            }
            ElementItems::Expressions(_, reader) => {
                for expr in reader {
                    let mut ops = expr?.get_operators_reader();
                    match (ops.read()?, ops.read()?) {
                        (Operator::RefFunc { function_index }, Operator::End) => {
                            funcs.push(Some(FuncIndex::from_u32(function_index)));
                        }
                        (Operator::RefNull { .. }, Operator::End) => funcs.push(None),
                        _ => return Err(DecodeError::UnsupportedElementItem { segment }),
                    }
                }
            }
        }

        Ok(ElementSegment { kind, funcs })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn sections(&self) -> &[Section<'a>] {
        &self.sections
    }

    pub fn imports(&self) -> &[Import<'a>] {
        &self.imports
    }

    /// Table 0, the only table the dispatch analysis resolves.
    pub fn table(&self) -> Option<&TableDesc> {
        self.tables.first()
    }

    pub fn tables(&self) -> &[TableDesc] {
        &self.tables
    }

    pub fn elements(&self) -> &[ElementSegment] {
        &self.elements
    }

    pub fn names(&self) -> Option<&NameSection<'a>> {
        self.names.as_ref()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Encoded size of a body, locals declaration included.
    pub fn body_len(&self, index: CodeIndex) -> Option<usize> {
        self.bodies.get(index).map(|body| body.range().len())
    }

    pub fn total_body_len(&self) -> usize {
        self.bodies.values().map(|body| body.range().len()).sum()
    }

    /// Decodes the operators of one body. Instruction offsets are relative
    /// to the start of the body.
    pub fn disassemble(&self, index: CodeIndex) -> Result<Vec<Instruction>, DecodeError> {
        let body = self
            .bodies
            .get(index)
            .ok_or(DecodeError::BodyOutOfRange {
                index,
                bodies: self.bodies.len(),
            })?;

        let reader = body.get_operators_reader()?;
        decode_operators(reader, self.bytes, body.range().start)
    }
}

fn section_name(id: u8) -> &'static str {
    match id {
        0 => "custom",
        1 => "type",
        2 => "import",
        3 => "function",
        4 => "table",
        5 => "memory",
        6 => "global",
        7 => "export",
        8 => "start",
        9 => "element",
        10 => "code",
        11 => "data",
        12 => "datacount",
        13 => "tag",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    const MODULE: &str = r#"
        (module
          (import "env" "log" (func $log (param i32)))
          (import "env" "mem" (memory 1))
          (global $sp (mut i32) (i32.const 1024))
          (table 4 funcref)
          (elem (i32.const 1) $b $a)
          (func $a (result i32)
            i32.const 7)
          (func $b
            i32.const 1
            call $log))
    "#;

    fn parse(wat: &str) -> Vec<u8> {
        wat::parse_str(wat).unwrap()
    }

    #[test]
    fn collects_imports_and_tables() {
        let bytes = parse(MODULE);
        let module = Module::parse(&bytes).unwrap();

        assert_eq!(module.imports().len(), 2);
        assert_eq!(module.imports().iter().filter(|i| i.is_func()).count(), 1);
        assert_eq!(module.imports()[0].module, "env");
        assert_eq!(module.imports()[0].field, "log");

        let table = module.table().unwrap();
        assert_eq!(table.element, TableElement::FuncRef);
        assert_eq!(table.initial, 4);
        assert_eq!(module.body_count(), 2);
    }

    #[test]
    fn decodes_active_segments() {
        let bytes = parse(MODULE);
        let module = Module::parse(&bytes).unwrap();

        let [segment] = module.elements() else {
            panic!("expected a single segment");
        };
        let SegmentKind::Active { table, offset } = &segment.kind else {
            panic!("expected an active segment");
        };
        assert_eq!(*table, 0);
        assert_eq!(offset.len(), 2);
        assert_eq!(offset[0], Instruction::i32_const(1).with_span(0, 2));
        assert_eq!(offset[1].opcode, Opcode::End);
        assert_eq!(
            segment.funcs,
            vec![Some(FuncIndex::from_u32(2)), Some(FuncIndex::from_u32(1))]
        );
    }

    #[test]
    fn null_element_items_are_kept_as_holes() {
        let bytes = parse(
            r#"(module
                 (table 2 funcref)
                 (elem (i32.const 0) funcref (ref.null func) (ref.func $f))
                 (func $f))"#,
        );
        let module = Module::parse(&bytes).unwrap();

        let [segment] = module.elements() else {
            panic!("expected a single segment");
        };
        assert_eq!(segment.funcs, vec![None, Some(FuncIndex::from_u32(0))]);
    }

    #[test]
    fn rejects_computed_element_items() {
        let bytes = parse(
            r#"(module
                 (import "env" "f" (global $g funcref))
                 (table 1 funcref)
                 (elem (i32.const 0) funcref (global.get $g)))"#,
        );
        let Err(err) = Module::parse(&bytes) else {
            panic!("computed element item was accepted");
        };
        assert!(
            matches!(err, DecodeError::UnsupportedElementItem { segment: 0 }),
            "{err}"
        );
    }

    #[test]
    fn disassembles_bodies_with_spans() {
        let bytes = parse(MODULE);
        let module = Module::parse(&bytes).unwrap();

        let insts = module.disassemble(CodeIndex::from_u32(1)).unwrap();
        let names: Vec<_> = insts.iter().map(|inst| inst.name().to_string()).collect();
        assert_eq!(names, ["i32.const", "call", "end"]);
        assert_eq!(insts[1].callee(), Some(FuncIndex::from_u32(0)));

        // Spans tile the body after the locals declaration.
        for pair in insts.windows(2) {
            assert_eq!(pair[0].offset + pair[0].len, pair[1].offset);
        }
        let last = insts.last().unwrap();
        assert_eq!(
            (last.offset + last.len) as usize,
            module.body_len(CodeIndex::from_u32(1)).unwrap()
        );

        let err = module.disassemble(CodeIndex::from_u32(2)).unwrap_err();
        assert!(matches!(err, DecodeError::BodyOutOfRange { bodies: 2, .. }));
    }

    #[test]
    fn unmodeled_operators_keep_their_code() {
        let bytes = parse(
            r#"(module (func (result i32) i32.const 2 i32.const 3 i32.mul))"#,
        );
        let module = Module::parse(&bytes).unwrap();

        let insts = module.disassemble(CodeIndex::from_u32(0)).unwrap();
        assert_eq!(insts[2].opcode.code(), 0x6c);
        assert_eq!(insts[2].name(), "i32.mul");
    }

    #[test]
    fn records_function_names() {
        let bytes = parse(MODULE);
        let module = Module::parse(&bytes).unwrap();

        let names = module.names().unwrap().functions().unwrap();
        assert!(names.contains(&(1, "a")));
        assert!(names.contains(&(2, "b")));
        assert!(module.sections().iter().any(|s| s.name == "name"));
        assert!(module.sections().iter().any(|s| s.name == "code"));
    }
}
