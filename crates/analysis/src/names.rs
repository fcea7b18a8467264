use cranelift_entity::SecondaryMap;
use fission_module::{prelude::*, Module};

use crate::SplitError;

/// Function names keyed by function index.
///
/// Imports are named `module.field`; defined functions take their entry from
/// the `name` section and display as their index when they have none.
#[derive(Debug, Clone)]
pub struct NameTable {
    space: IndexSpace,
    names: SecondaryMap<FuncIndex, Option<Box<str>>>,
}

impl NameTable {
    pub fn build(module: &Module<'_>) -> Result<Self, SplitError> {
        let func_imports: Vec<_> = module.imports().iter().filter(|i| i.is_func()).collect();
        let space = IndexSpace::new(func_imports.len() as u32, module.body_count() as u32);

        let section = module.names().ok_or(SplitError::NameSectionMissing)?;
        let entries = section.functions().ok_or(SplitError::NoFunctionNames)?;

        let mut names = SecondaryMap::with_capacity(space.total() as usize);
        for (index, import) in func_imports.iter().enumerate() {
            names[FuncIndex::new(index)] = Some(format!("{}.{}", import.module, import.field).into());
        }

        for &(index, name) in entries {
            let func = FuncIndex::from_u32(index);
            if !space.contains(func) {
                tracing::warn!(index, name, "function name outside the index space, ignored");
                continue;
            }
            if space.is_import(func) {
                continue;
            }
            names[func] = Some(name.into());
        }

        tracing::debug!(
            imports = space.func_imports(),
            bodies = space.bodies(),
            named = entries.len(),
            "resolved function names"
        );
        Ok(Self { space, names })
    }

    pub fn space(&self) -> IndexSpace {
        self.space
    }

    pub fn get(&self, func: FuncIndex) -> Option<&str> {
        self.names.get(func).and_then(|name| name.as_deref())
    }

    /// Name for diagnostics: the recorded name or the bare index.
    pub fn display(&self, func: FuncIndex) -> String {
        match self.get(func) {
            Some(name) => name.to_string(),
            None => func.to_string(),
        }
    }

    /// Defined functions that carry a name, in code order.
    pub fn named_bodies(&self) -> impl Iterator<Item = (CodeIndex, &str)> + '_ {
        self.space
            .iter_codes()
            .filter_map(|code| Some((code, self.get(self.space.to_func(code))?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(wat: &str) -> Result<NameTable, SplitError> {
        let bytes = wat::parse_str(wat).unwrap();
        let module = Module::parse(&bytes).unwrap();
        NameTable::build(&module)
    }

    #[test]
    fn imports_are_synthesized() {
        let names = table(
            r#"
            (module
              (import "go" "debug" (func $whatever (param i32)))
              (import "go" "mem" (memory 1))
              (import "go" "now" (func))
              (func $main.main)
              (func))
            "#,
        )
        .unwrap();

        let space = names.space();
        assert_eq!(space.func_imports(), 2);
        assert_eq!(space.bodies(), 2);
        assert_eq!(names.get(FuncIndex::new(0)), Some("go.debug"));
        assert_eq!(names.get(FuncIndex::new(1)), Some("go.now"));
        assert_eq!(names.get(FuncIndex::new(2)), Some("main.main"));
        assert_eq!(names.get(FuncIndex::new(3)), None);
        assert_eq!(names.display(FuncIndex::new(3)), "func3");

        let named: Vec<_> = names.named_bodies().collect();
        assert_eq!(named, [(CodeIndex::new(0), "main.main")]);
    }

    #[test]
    fn missing_name_section_is_fatal() {
        // A module without identifiers gets no name section.
        let err = table("(module (func))").unwrap_err();
        assert!(matches!(err, SplitError::NameSectionMissing));

        // Only a module name, no function-name subsection.
        let err = table("(module $m (func))").unwrap_err();
        assert!(matches!(err, SplitError::NoFunctionNames));
    }
}
