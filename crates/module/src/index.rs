use cranelift_entity::entity_impl;

/// An index into the unified function index space.
///
/// Imported functions occupy `0..func_imports`; locally defined bodies follow
/// in declaration order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncIndex(u32);
entity_impl!(FuncIndex, "func");

/// An index into the code section, i.e. the space of locally defined bodies.
///
/// Never constructed for an import. Use [`IndexSpace`] to move between the two
/// spaces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CodeIndex(u32);
entity_impl!(CodeIndex, "code");

/// Shape of the function index space of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpace {
    func_imports: u32,
    bodies: u32,
}

impl IndexSpace {
    pub fn new(func_imports: u32, bodies: u32) -> Self {
        Self {
            func_imports,
            bodies,
        }
    }

    pub fn func_imports(&self) -> u32 {
        self.func_imports
    }

    pub fn bodies(&self) -> u32 {
        self.bodies
    }

    /// Number of functions in the function index space.
    pub fn total(&self) -> u32 {
        self.func_imports + self.bodies
    }

    pub fn contains(&self, func: FuncIndex) -> bool {
        func.as_u32() < self.total()
    }

    pub fn is_import(&self, func: FuncIndex) -> bool {
        func.as_u32() < self.func_imports
    }

    /// Returns the body of `func`, or `None` if `func` is an import or lies
    /// past the end of the index space.
    pub fn to_code(&self, func: FuncIndex) -> Option<CodeIndex> {
        if self.is_import(func) || !self.contains(func) {
            return None;
        }
        Some(CodeIndex::from_u32(func.as_u32() - self.func_imports))
    }

    pub fn to_func(&self, code: CodeIndex) -> FuncIndex {
        FuncIndex::from_u32(code.as_u32() + self.func_imports)
    }

    pub fn iter_codes(&self) -> impl Iterator<Item = CodeIndex> {
        (0..self.bodies).map(CodeIndex::from_u32)
    }

    pub fn iter_funcs(&self) -> impl Iterator<Item = FuncIndex> {
        (0..self.total()).map(FuncIndex::from_u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_shift_by_import_count() {
        let space = IndexSpace::new(2, 3);

        assert_eq!(space.total(), 5);
        assert!(space.is_import(FuncIndex::from_u32(1)));
        assert_eq!(space.to_code(FuncIndex::from_u32(1)), None);
        assert_eq!(
            space.to_code(FuncIndex::from_u32(2)),
            Some(CodeIndex::from_u32(0))
        );
        assert_eq!(space.to_code(FuncIndex::from_u32(5)), None);
        assert_eq!(
            space.to_func(CodeIndex::from_u32(2)),
            FuncIndex::from_u32(4)
        );
    }

    #[test]
    fn display_names_the_space() {
        assert_eq!(FuncIndex::from_u32(7).to_string(), "func7");
        assert_eq!(CodeIndex::from_u32(7).to_string(), "code7");
    }
}
