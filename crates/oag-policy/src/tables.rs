//! Auxiliary signature tables and the indexes built from them.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::PltRedirects;

const VOID: &str = "void";
const VOID_POINTER: &str = "Pointer(void)";

/// Kind of auxiliary table a policy can depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// Parameter types of every function, from DWARF.
    FunctionSignatures,
    /// Parameter types the compiler saw at each indirect call site.
    CallSiteSignatures,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FunctionSignatures => "function signature table",
            Self::CallSiteSignatures => "call-site signature table",
        })
    }
}

/// Parameter list of a function, return type excluded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signature {
    Params(Vec<String>),
    /// Unique stand-in for a function without type information.
    Opaque(u32),
}

impl Signature {
    /// Every signature this one may be widened to.
    ///
    /// Each parameter independently stays, becomes `Pointer(void)` when it is
    /// another pointer, or becomes `void`. Opaque signatures only match
    /// themselves.
    pub fn supertypes(&self) -> Vec<Self> {
        let Self::Params(params) = self else {
            return vec![self.clone()];
        };

        let mut widened: Vec<Vec<String>> = vec![Vec::with_capacity(params.len())];
        for param in params {
            let mut options = vec![param.as_str()];
            if param.starts_with("Pointer") && param != VOID_POINTER {
                options.push(VOID_POINTER);
            }
            if param != VOID {
                options.push(VOID);
            }
            widened = widened
                .into_iter()
                .flat_map(|prefix| {
                    options.iter().map(move |option| {
                        let mut next = prefix.clone();
                        next.push((*option).to_string());
                        next
                    })
                })
                .collect();
        }
        widened.into_iter().map(Self::Params).collect()
    }

    /// Number of parameters, unknown for opaque signatures.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::Params(params) => Some(params.len()),
            Self::Opaque(_) => None,
        }
    }
}

/// Function entry -> parameter types.
#[derive(Clone, Debug, Default)]
pub struct SignatureTable {
    by_function: FxHashMap<u64, Vec<String>>,
}

impl SignatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, function: u64, params: Vec<String>) {
        self.by_function.insert(function, params);
    }

    /// Insert a `[return, param...]` list; the return type is dropped.
    pub fn insert_with_return(&mut self, function: u64, mut types: Vec<String>) {
        if !types.is_empty() {
            types.remove(0);
        }
        self.insert(function, types);
    }

    pub fn get(&self, function: u64) -> Option<&[String]> {
        self.by_function.get(&function).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_function.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_function.is_empty()
    }
}

/// (binary, call site) -> parameter types seen by the compiler.
#[derive(Clone, Debug, Default)]
pub struct CallSiteSignatures {
    by_binary: FxHashMap<String, FxHashMap<u64, Vec<String>>>,
}

impl CallSiteSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, binary: &str, site: u64, params: Vec<String>) {
        self.by_binary
            .entry(binary.to_string())
            .or_default()
            .insert(site, params);
    }

    pub fn get(&self, binary: &str, site: u64) -> Option<&[String]> {
        self.by_binary
            .get(binary)?
            .get(&site)
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_binary.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Signature of every function entry and PLT stub, and the reverse lookup.
#[derive(Clone, Debug, Default)]
pub struct TypeIndex {
    of_function: FxHashMap<u64, Signature>,
    by_signature: FxHashMap<Signature, Vec<u64>>,
}

impl TypeIndex {
    /// Functions without an entry in `table` get a fresh opaque signature. PLT
    /// stubs take the signature of their redirect target.
    pub fn build(
        table: &SignatureTable,
        functions: &FxHashSet<u64>,
        redirects: &PltRedirects,
    ) -> Self {
        let mut of_function: FxHashMap<u64, Signature> = FxHashMap::default();
        for &function in functions {
            if let Some(params) = table.get(function) {
                of_function.insert(function, Signature::Params(params.to_vec()));
            }
        }

        let untyped: BTreeSet<u64> = functions
            .iter()
            .copied()
            .chain(redirects.iter().map(|(_, target)| target))
            .filter(|function| !of_function.contains_key(function))
            .collect();
        let mut opaque = 0;
        for function in untyped {
            of_function.insert(function, Signature::Opaque(opaque));
            opaque += 1;
        }

        for (stub, target) in redirects.iter() {
            if let Some(signature) = of_function.get(&target).cloned() {
                of_function.insert(stub, signature);
            }
        }

        let mut by_signature: FxHashMap<Signature, Vec<u64>> = FxHashMap::default();
        for (&function, signature) in &of_function {
            by_signature
                .entry(signature.clone())
                .or_default()
                .push(function);
        }
        for members in by_signature.values_mut() {
            members.sort_unstable();
        }

        debug!(
            typed = of_function.len() - opaque as usize,
            opaque, "type index built"
        );
        Self {
            of_function,
            by_signature,
        }
    }

    pub fn signature_of(&self, function: u64) -> Option<&Signature> {
        self.of_function.get(&function)
    }

    /// Functions a call with `signature` may reach.
    pub fn functions_matching<'a>(
        &'a self,
        signature: &Signature,
    ) -> impl Iterator<Item = u64> + use<'a> {
        signature
            .supertypes()
            .into_iter()
            .filter_map(|supertype| self.by_signature.get(&supertype))
            .flatten()
            .copied()
    }
}

/// Arity of a function. -1 when unknown.
pub const UNKNOWN_ARITY: i64 = -1;

/// Parameter count of every typed function entry and PLT stub.
#[derive(Clone, Debug, Default)]
pub struct ArgCountIndex {
    of_function: FxHashMap<u64, i64>,
    by_count: FxHashMap<i64, Vec<u64>>,
}

impl ArgCountIndex {
    pub fn build(
        table: &SignatureTable,
        functions: &FxHashSet<u64>,
        redirects: &PltRedirects,
    ) -> Self {
        let mut of_function: FxHashMap<u64, i64> = FxHashMap::default();
        for &function in functions {
            if let Some(params) = table.get(function) {
                of_function.insert(function, arity(params.len()));
            }
        }
        for (stub, target) in redirects.iter() {
            let count = of_function.get(&target).copied().unwrap_or(UNKNOWN_ARITY);
            of_function.insert(stub, count);
        }

        let mut by_count: FxHashMap<i64, Vec<u64>> = FxHashMap::default();
        for (&function, &count) in &of_function {
            if count != UNKNOWN_ARITY {
                by_count.entry(count).or_default().push(function);
            }
        }
        for members in by_count.values_mut() {
            members.sort_unstable();
        }

        Self {
            of_function,
            by_count,
        }
    }

    pub fn count_of(&self, function: u64) -> i64 {
        self.of_function
            .get(&function)
            .copied()
            .unwrap_or(UNKNOWN_ARITY)
    }

    /// Functions taking exactly `count` parameters. Unknown arity matches nothing.
    pub fn functions_with(&self, count: i64) -> &[u64] {
        self.by_count.get(&count).map_or(&[][..], Vec::as_slice)
    }
}

/// Parameter count as stored in the index.
pub fn arity(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
