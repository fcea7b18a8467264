use std::collections::BTreeSet;

use fission_module::{prelude::*, Module};
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::{
    estimate_stubs, evaluate, find_slice_start, DisasmCache, ExprError, FunctionTable, NameTable,
    Site, SplitConfig, SplitError, SplitReport,
};

/// Functions proposed for extraction, in ascending code order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet(BTreeSet<CodeIndex>);

impl CandidateSet {
    pub fn new(codes: impl IntoIterator<Item = CodeIndex>) -> Result<Self, SplitError> {
        let codes: BTreeSet<_> = codes.into_iter().collect();
        if codes.is_empty() {
            return Err(SplitError::EmptyCandidateSet);
        }
        Ok(Self(codes))
    }

    pub fn contains(&self, code: CodeIndex) -> bool {
        self.0.contains(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = CodeIndex> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitStats {
    pub functions: usize,
    pub direct_calls: usize,
    pub indirect_calls: usize,
    /// Calls, direct or resolved through the table, that land on an import.
    pub import_calls: usize,
    /// Distinct imports reached from the set.
    pub imports_used: usize,
    /// Body bytes of the candidates.
    pub split_bytes: usize,
    /// Body bytes of the whole module.
    pub total_bytes: usize,
}

#[derive(Debug, Default)]
struct FuncStats {
    direct_calls: usize,
    indirect_calls: usize,
    import_calls: usize,
    imports: FxHashSet<FuncIndex>,
}

/// One validation context: the lookup tables derived from a module and the
/// body cache shared by every query against it.
pub struct Splitter<'m, 'a> {
    module: &'m Module<'a>,
    names: NameTable,
    table: FunctionTable,
    cache: DisasmCache<'m, 'a>,
    config: SplitConfig,
}

impl<'m, 'a> Splitter<'m, 'a> {
    pub fn new(module: &'m Module<'a>, config: SplitConfig) -> Result<Self, SplitError> {
        let names = NameTable::build(module)?;
        let table = FunctionTable::build(module)?;

        Ok(Self {
            module,
            names,
            table,
            cache: DisasmCache::new(module),
            config,
        })
    }

    pub fn module(&self) -> &'m Module<'a> {
        self.module
    }

    pub fn names(&self) -> &NameTable {
        &self.names
    }

    pub fn table(&self) -> &FunctionTable {
        &self.table
    }

    pub fn cache(&self) -> &DisasmCache<'m, 'a> {
        &self.cache
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    pub fn space(&self) -> IndexSpace {
        self.names.space()
    }

    /// Named bodies matching any configured prefix.
    pub fn select(&self) -> Result<CandidateSet, SplitError> {
        let selected = self
            .names
            .named_bodies()
            .filter(|(_, name)| self.config.matches(name))
            .map(|(code, _)| code);
        CandidateSet::new(selected)
    }

    /// Checks that every call made by a candidate stays inside the set or
    /// lands on an import.
    ///
    /// Candidates may be checked concurrently, but the error reported is the
    /// first one in ascending code order and body order.
    #[tracing::instrument(skip_all, fields(candidates = candidates.len()))]
    pub fn validate(&self, candidates: &CandidateSet) -> Result<SplitStats, SplitError> {
        let codes: Vec<_> = candidates.iter().collect();

        let mut results: Vec<_> = if self.config.parallel {
            codes
                .into_par_iter()
                .map(|code| (code, self.check_function(code, candidates)))
                .collect()
        } else {
            codes
                .into_iter()
                .map(|code| (code, self.check_function(code, candidates)))
                .collect()
        };
        results.sort_by_key(|(code, _)| code.as_u32());

        let mut stats = SplitStats {
            total_bytes: self.module.total_body_len(),
            ..SplitStats::default()
        };
        let mut imports = FxHashSet::default();
        for (code, result) in results {
            let func = result?;
            stats.functions += 1;
            stats.direct_calls += func.direct_calls;
            stats.indirect_calls += func.indirect_calls;
            stats.import_calls += func.import_calls;
            stats.split_bytes += self.module.body_len(code).unwrap_or_default();
            imports.extend(func.imports);
        }
        stats.imports_used = imports.len();

        tracing::info!(
            functions = stats.functions,
            direct = stats.direct_calls,
            indirect = stats.indirect_calls,
            imports = stats.import_calls,
            "split set is closed"
        );
        Ok(stats)
    }

    /// Selects, validates and, when configured, estimates stub savings.
    pub fn run(&self) -> Result<SplitReport, SplitError> {
        let candidates = self.select()?;
        let stats = self.validate(&candidates)?;
        let stubs = if self.config.estimate_stubs {
            Some(estimate_stubs(
                &self.cache,
                self.space(),
                self.config.stub_shape,
            )?)
        } else {
            None
        };

        Ok(SplitReport { stats, stubs })
    }

    fn check_function(
        &self,
        code: CodeIndex,
        candidates: &CandidateSet,
    ) -> Result<FuncStats, SplitError> {
        let space = self.space();
        let caller = space.to_func(code);
        let insts = self.cache.disassemble(code)?;
        let mut stats = FuncStats::default();

        for (index, inst) in insts.iter().enumerate() {
            let callee = match inst.opcode {
                Opcode::Call | Opcode::ReturnCall => {
                    stats.direct_calls += 1;
                    inst.callee().ok_or_else(|| {
                        let reason = format!("`{}` without a function index", inst.name());
                        ExprError::Malformed(reason).at(self.site(caller, index, inst))
                    })?
                }
                Opcode::CallIndirect | Opcode::ReturnCallIndirect => {
                    stats.indirect_calls += 1;
                    self.resolve_indirect(caller, &insts, index)?
                }
                _ => continue,
            };

            if !space.contains(callee) {
                return Err(SplitError::CalleeOutOfRange {
                    callee,
                    total: space.total(),
                    site: self.site(caller, index, inst),
                });
            }

            if space.is_import(callee) {
                stats.import_calls += 1;
                stats.imports.insert(callee);
                continue;
            }

            let inside = space
                .to_code(callee)
                .is_some_and(|code| candidates.contains(code));
            if !inside {
                return Err(SplitError::ExternalCallViolation {
                    caller,
                    callee,
                    caller_name: self.names.display(caller),
                    callee_name: self.names.display(callee),
                });
            }
        }

        Ok(stats)
    }

    /// Resolves the table slot a `call_indirect` reads by evaluating the
    /// expression that produces its index operand.
    fn resolve_indirect(
        &self,
        caller: FuncIndex,
        insts: &[Instruction],
        index: usize,
    ) -> Result<FuncIndex, SplitError> {
        let inst = &insts[index];
        let site = || self.site(caller, index, inst);

        let reads_table_zero = inst
            .immediates
            .iter()
            .all(|imm| !matches!(imm, Immediate::Table(table) if *table != 0));
        if !reads_table_zero {
            return Err(SplitError::UnresolvedIndirectTarget { site: site() });
        }

        let preceding = &insts[..index];
        let start = find_slice_start(preceding, 1)
            .map_err(|err| err.at(site()))?
            .ok_or_else(|| SplitError::UnresolvedIndirectTarget { site: site() })?;

        let values = evaluate(&preceding[start..]).map_err(|err| err.at(site()))?;
        let &[slot] = values.as_slice() else {
            let reason = format!("expected one table index, found {} values", values.len());
            return Err(ExprError::Malformed(reason).at(site()));
        };

        let callee = self
            .table
            .slot(slot)
            .map_err(|source| SplitError::TableLookup {
                source,
                site: site(),
            })?;
        tracing::trace!(%caller, slot, %callee, "resolved indirect call");
        Ok(callee)
    }

    fn site(&self, func: FuncIndex, inst: usize, instruction: &Instruction) -> Site {
        Site {
            func,
            name: self.names.display(func),
            inst,
            opcode: instruction.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"
        (module
          (import "env" "log" (func $log (param i32)))
          (func $pkg.a call $pkg.b)
          (func $pkg.b i32.const 0 call $log)
          (func $main call $pkg.a))
    "#;

    fn splitter<'m, 'a>(module: &'m Module<'a>, prefixes: &[&str]) -> Splitter<'m, 'a> {
        let config = SplitConfig::default().with_prefixes(prefixes.iter().copied());
        Splitter::new(module, config).unwrap()
    }

    #[test]
    fn selects_by_prefix() {
        let bytes = wat::parse_str(CHAIN).unwrap();
        let module = Module::parse(&bytes).unwrap();

        let candidates = splitter(&module, &["pkg."]).select().unwrap();
        let codes: Vec<_> = candidates.iter().map(|c| c.as_u32()).collect();
        assert_eq!(codes, [0, 1]);

        let err = splitter(&module, &["nope"]).select().unwrap_err();
        assert!(matches!(err, SplitError::EmptyCandidateSet));
    }

    #[test]
    fn closed_set_passes() {
        let bytes = wat::parse_str(CHAIN).unwrap();
        let module = Module::parse(&bytes).unwrap();
        let splitter = splitter(&module, &["pkg."]);

        let stats = splitter.validate(&splitter.select().unwrap()).unwrap();
        assert_eq!(stats.functions, 2);
        assert_eq!(stats.direct_calls, 2);
        assert_eq!(stats.import_calls, 1);
        assert_eq!(stats.imports_used, 1);
        assert_eq!(stats.indirect_calls, 0);
        assert!(stats.split_bytes < stats.total_bytes);
    }

    #[test]
    fn single_external_call_is_reported() {
        let bytes = wat::parse_str(CHAIN).unwrap();
        let module = Module::parse(&bytes).unwrap();
        let splitter = splitter(&module, &["pkg.a"]);

        let err = splitter.validate(&splitter.select().unwrap()).unwrap_err();
        let SplitError::ExternalCallViolation {
            caller,
            callee,
            caller_name,
            callee_name,
        } = &err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!((caller.as_u32(), callee.as_u32()), (1, 2));
        assert_eq!((caller_name.as_str(), callee_name.as_str()), ("pkg.a", "pkg.b"));
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let bytes = wat::parse_str(CHAIN).unwrap();
        let module = Module::parse(&bytes).unwrap();
        let candidates = CandidateSet::new([CodeIndex::new(0), CodeIndex::new(2)]).unwrap();

        let mut config = SplitConfig::default();
        let parallel = Splitter::new(&module, config.clone()).unwrap();
        config.parallel = false;
        let sequential = Splitter::new(&module, config).unwrap();

        let a = parallel.validate(&candidates).unwrap_err().to_string();
        let b = sequential.validate(&candidates).unwrap_err().to_string();
        assert_eq!(a, b);
        assert!(a.starts_with("pkg.a (func1) calls pkg.b (func2)"), "{a}");
    }

    /// `pkg.a` and `pkg.b` each leave the set; `pkg.c` leaves it twice.
    const LEAKY: &str = r#"
        (module
          (func $pkg.a call $main)
          (func $pkg.b call $main)
          (func $pkg.c call $other call $main)
          (func $main)
          (func $other))
    "#;

    #[test]
    fn lowest_candidate_is_reported() {
        let bytes = wat::parse_str(LEAKY).unwrap();
        let module = Module::parse(&bytes).unwrap();

        for parallel in [true, false] {
            let mut config = SplitConfig::default().with_prefixes(["pkg."]);
            config.parallel = parallel;
            let splitter = Splitter::new(&module, config).unwrap();

            let err = splitter.validate(&splitter.select().unwrap()).unwrap_err();
            let SplitError::ExternalCallViolation {
                caller_name,
                callee_name,
                ..
            } = &err
            else {
                panic!("unexpected error: {err}");
            };
            assert_eq!(caller_name, "pkg.a", "parallel: {parallel}");
            assert_eq!(callee_name, "main", "parallel: {parallel}");
        }
    }

    #[test]
    fn earliest_call_in_a_body_is_reported() {
        let bytes = wat::parse_str(LEAKY).unwrap();
        let module = Module::parse(&bytes).unwrap();
        let splitter = splitter(&module, &["pkg.c"]);

        let err = splitter.validate(&splitter.select().unwrap()).unwrap_err();
        let SplitError::ExternalCallViolation { callee, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(callee.as_u32(), 4);
    }

    #[test]
    fn tail_calls_are_checked() {
        let bytes = wat::parse_str(
            r#"
            (module
              (func $pkg.a return_call $main)
              (func $pkg.b return_call $pkg.c)
              (func $pkg.c)
              (func $main))
            "#,
        )
        .unwrap();
        let module = Module::parse(&bytes).unwrap();

        let escaping = splitter(&module, &["pkg.a"]);
        let err = escaping.validate(&escaping.select().unwrap()).unwrap_err();
        assert!(
            err.to_string().starts_with("pkg.a (func0) calls main (func3)"),
            "{err}"
        );

        let closed = splitter(&module, &["pkg.b", "pkg.c"]);
        let stats = closed.validate(&closed.select().unwrap()).unwrap();
        assert_eq!(stats.functions, 2);
        assert_eq!(stats.direct_calls, 1);
    }

    #[test]
    fn empty_candidate_set_is_rejected() {
        let err = CandidateSet::new(std::iter::empty()).unwrap_err();
        assert!(matches!(err, SplitError::EmptyCandidateSet));
    }
}
