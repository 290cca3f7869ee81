//! The compiler runner: file set in, Image plus annotations out.
//!
//! ```text
//!   ProtoFileSet
//!        │
//!        ▼
//!   parse waves ── requested files, then their not-yet-seen imports,
//!        │         each wave fanned out over a rayon pool (barrier between)
//!        ▼
//!   import graph ── missing / duplicate / cyclic imports → annotations
//!        │
//!        ▼
//!   symbol table ── built serially in dependency order, then read-only
//!        │
//!        ▼
//!   link (parallel) ── one FileDescriptorProto per healthy file
//!        │
//!        ▼
//!   Image (topological order, is_import = not requested)
//! ```
//!
//! A file with annotations is excluded from the Image, and so is every file
//! that imports it. Everything else is still built.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rayon::prelude::*;

use protoimage_dsl::{parse_proto, ProtoFile};
use protoimage_image::{Image, ImageFile};
use protoimage_storage::{path, ReadBucket};

use crate::annotation::{sort_and_dedup, Annotation, AnnotationKind};
use crate::cancel::CancelToken;
use crate::file_set::ProtoFileSet;
use crate::link::{link_file, LinkContext};
use crate::symbols::SymbolTable;
use crate::{wkt, BuildError};

/// A successfully parsed file.
#[derive(Debug, Clone)]
pub(crate) struct ParsedFile {
    /// Root-relative name; what imports refer to.
    pub name: String,
    /// Bucket path (or the name, for embedded files). Annotations use it.
    pub path: String,
    pub ast: ProtoFile,
}

/// Output of [`Runner::run`].
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub image: Image,
    /// Sorted by path, then position. Empty for a clean build.
    pub annotations: Vec<Annotation>,
}

/// Where the source of a file comes from.
#[derive(Debug, Clone)]
enum Source {
    Bucket { name: String, path: String },
    Embedded { name: String, text: &'static str },
}

enum Loaded {
    Parsed(ParsedFile),
    Failed { name: String, annotation: Annotation },
}

#[derive(Debug, Clone, Default)]
pub struct Runner {
    cancel: CancelToken,
    parallelism: Option<usize>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cap the number of worker threads (defaults to the available
    /// parallelism).
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads.max(1));
        self
    }

    /// Compile `file_set`.
    ///
    /// Schema problems come back as annotations; only I/O failures,
    /// cancellation and internal invariant violations are errors.
    pub fn run(
        &self,
        bucket: &dyn ReadBucket,
        file_set: &ProtoFileSet,
        include_imports: bool,
        include_source_info: bool,
    ) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        self.cancel.check()?;

        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        let threads = self
            .parallelism
            .unwrap_or(available)
            .min(file_set.len().max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("protoimage-{i}"))
            .build()?;

        let mut annotations: Vec<Annotation> = Vec::new();
        let (files, failed) = self.parse_all(&pool, bucket, file_set, &mut annotations)?;
        let by_name: HashMap<&str, usize> = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), i))
            .collect();
        tracing::debug!(
            parsed = files.len(),
            failed = failed.len(),
            threads,
            "parse phase done"
        );

        // Import graph.
        let mut broken = vec![false; files.len()];
        let mut deps: Vec<Vec<Option<usize>>> = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut targets = Vec::with_capacity(file.ast.imports.len());
            for import in &file.ast.imports {
                let name = import.path.value.as_str();
                let annotate = |message: String| {
                    Annotation::error(&file.path, AnnotationKind::Import, message).at(import.path.span)
                };
                let target = by_name.get(name).copied();
                if !seen.insert(name) {
                    annotations.push(annotate(format!("Import \"{name}\" was listed twice.")));
                    broken[i] = true;
                } else if path::normalize(name).ok().as_deref() != Some(name) {
                    annotations.push(annotate(format!(
                        "Import \"{name}\" is not a normalized relative path."
                    )));
                    broken[i] = true;
                } else if target.is_none() {
                    let message = if failed.contains(name) {
                        format!("Import \"{name}\" was not found or had errors.")
                    } else {
                        format!("import \"{name}\": file does not exist")
                    };
                    annotations.push(annotate(message));
                    broken[i] = true;
                }
                targets.push(target);
            }
            deps.push(targets);
        }

        let requested: Vec<usize> = file_set
            .files()
            .iter()
            .filter_map(|f| by_name.get(f.name.as_str()).copied())
            .collect();
        let order = topological_order(&files, &deps, &requested, &mut broken, &mut annotations);
        propagate_broken(&files, &deps, &order, &mut broken, &mut annotations);

        // Symbols.
        self.cancel.check()?;
        let healthy: Vec<usize> = order.iter().copied().filter(|&i| !broken[i]).collect();
        let (table, conflicts) = SymbolTable::build(&files, &healthy);
        for conflict in conflicts {
            annotations.push(
                Annotation::error(&files[conflict.file].path, AnnotationKind::Compile, conflict.message)
                    .at(conflict.span),
            );
            broken[conflict.file] = true;
        }
        propagate_broken(&files, &deps, &order, &mut broken, &mut annotations);
        tracing::debug!(symbols = table.len(), "symbol table built");

        // Link.
        let ctx = LinkContext {
            files: &files,
            deps: &deps,
            table: &table,
            include_source_info,
        };
        let healthy: Vec<usize> = order.iter().copied().filter(|&i| !broken[i]).collect();
        let cancel = &self.cancel;
        let linked = pool.install(|| {
            healthy
                .par_iter()
                .map(|&i| {
                    cancel.check()?;
                    let (descriptor, found) = link_file(&ctx, i);
                    Ok((i, descriptor, found))
                })
                .collect::<Result<Vec<_>, BuildError>>()
        })?;

        // `linked` follows the topological order, so every import has been
        // settled by the time its importer is looked at. A file whose import
        // failed to link reports that import instead of the cascade of
        // resolution errors it caused.
        let mut descriptors = HashMap::with_capacity(linked.len());
        for (i, descriptor, found) in linked {
            if mark_broken_imports(&files, &deps, i, &mut broken, &mut annotations) {
                continue;
            }
            if !found.is_empty() {
                broken[i] = true;
                annotations.extend(found);
            }
            descriptors.insert(i, descriptor);
        }

        // Assemble.
        self.cancel.check()?;
        let requested: HashSet<usize> = requested.into_iter().collect();
        let mut image_files = Vec::with_capacity(order.len());
        for &i in &order {
            if broken[i] {
                continue;
            }
            let Some(descriptor) = descriptors.remove(&i) else {
                continue;
            };
            image_files.push(
                ImageFile::new(descriptor, !requested.contains(&i))
                    .with_syntax_unspecified(files[i].ast.syntax_decl.is_none()),
            );
        }
        let mut image = Image::new(image_files)?;
        if !include_imports {
            image = image.without_imports();
        }

        sort_and_dedup(&mut annotations);
        tracing::info!(
            requested = file_set.len(),
            files = image.len(),
            annotations = annotations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );
        Ok(BuildResult { image, annotations })
    }

    /// Parse the requested files, then keep parsing newly discovered imports
    /// until none are left. Returns the parsed files and the names of files
    /// that failed to parse.
    fn parse_all(
        &self,
        pool: &rayon::ThreadPool,
        bucket: &dyn ReadBucket,
        file_set: &ProtoFileSet,
        annotations: &mut Vec<Annotation>,
    ) -> Result<(Vec<ParsedFile>, HashSet<String>), BuildError> {
        let mut files: Vec<ParsedFile> = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut wave: Vec<Source> = file_set
            .files()
            .iter()
            .filter(|f| seen.insert(f.name.clone()))
            .map(|f| Source::Bucket {
                name: f.name.clone(),
                path: f.path.clone(),
            })
            .collect();

        let mut waves = 0;
        while !wave.is_empty() {
            waves += 1;
            self.cancel.check()?;
            let cancel = &self.cancel;
            let loaded = pool.install(|| {
                wave.par_iter()
                    .map(|source| load(cancel, bucket, source))
                    .collect::<Result<Vec<_>, BuildError>>()
            })?;

            let first_new = files.len();
            for result in loaded {
                match result {
                    Loaded::Parsed(file) => files.push(file),
                    Loaded::Failed { name, annotation } => {
                        failed.insert(name);
                        annotations.push(annotation);
                    }
                }
            }

            let mut next = Vec::new();
            for file in &files[first_new..] {
                for import in &file.ast.imports {
                    let name = &import.path.value;
                    if seen.contains(name) {
                        continue;
                    }
                    seen.insert(name.clone());
                    if let Some(source) = locate(bucket, file_set.roots(), name)? {
                        next.push(source);
                    }
                }
            }
            wave = next;
        }
        tracing::debug!(waves, files = files.len(), "parsed all reachable files");
        Ok((files, failed))
    }
}

/// Find an imported file under the roots, falling back to the embedded
/// well-known types. `None` when it exists nowhere or the import path is not
/// a normalized relative path.
fn locate(bucket: &dyn ReadBucket, roots: &[String], name: &str) -> Result<Option<Source>, BuildError> {
    match path::normalize(name) {
        Ok(normalized) if normalized == name => {}
        _ => return Ok(None),
    }
    let embedded = wkt::lookup(name);
    for root in roots {
        let Ok(candidate) = path::join(root, name) else {
            continue;
        };
        match bucket.exists(&candidate) {
            Ok(true) => {
                return Ok(Some(Source::Bucket {
                    name: name.to_string(),
                    path: candidate,
                }))
            }
            Ok(false) => {}
            Err(err) if embedded.is_some() => {
                tracing::warn!(path = %candidate, error = %err, "bucket copy unreadable, using embedded well-known type");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(embedded.map(|text| Source::Embedded {
        name: name.to_string(),
        text,
    }))
}

fn load(cancel: &CancelToken, bucket: &dyn ReadBucket, source: &Source) -> Result<Loaded, BuildError> {
    cancel.check()?;
    let (name, path, text) = match source {
        Source::Bucket { name, path } => {
            let bytes = bucket.get(path)?;
            match String::from_utf8(bytes) {
                Ok(text) => (name, path, std::borrow::Cow::Owned(text)),
                Err(_) => {
                    return Ok(Loaded::Failed {
                        name: name.clone(),
                        annotation: Annotation::error(path, AnnotationKind::Syntax, "file is not valid UTF-8"),
                    })
                }
            }
        }
        Source::Embedded { name, text } => (name, name, std::borrow::Cow::Borrowed(*text)),
    };
    match parse_proto(&text) {
        Ok(ast) => Ok(Loaded::Parsed(ParsedFile {
            name: name.clone(),
            path: path.clone(),
            ast,
        })),
        Err(err) => Ok(Loaded::Failed {
            name: name.clone(),
            annotation: Annotation::error(path, AnnotationKind::Syntax, err.message).at(err.span),
        }),
    }
}

/// Depth-first post-order from the requested files (in file-set order),
/// visiting imports in declaration order. Import cycles are annotated on the
/// file that closes them, and every file on the cycle is marked broken.
fn topological_order(
    files: &[ParsedFile],
    deps: &[Vec<Option<usize>>],
    roots: &[usize],
    broken: &mut [bool],
    annotations: &mut Vec<Annotation>,
) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let mut marks = vec![Mark::New; files.len()];
    let mut order = Vec::with_capacity(files.len());
    for &root in roots {
        if marks[root] != Mark::New {
            continue;
        }
        // (file, next import to visit)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::Active;
        while let Some(&(file, next)) = stack.last() {
            let Some(target) = deps[file].get(next).copied() else {
                marks[file] = Mark::Done;
                order.push(file);
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            let Some(target) = target else { continue };
            match marks[target] {
                Mark::New => {
                    marks[target] = Mark::Active;
                    stack.push((target, 0));
                }
                Mark::Active => {
                    let start = stack.iter().position(|(f, _)| *f == target).unwrap_or(0);
                    let cycle: Vec<&str> = stack[start..]
                        .iter()
                        .map(|(f, _)| files[*f].name.as_str())
                        .chain(std::iter::once(files[target].name.as_str()))
                        .collect();
                    let import = &files[file].ast.imports[next];
                    annotations.push(
                        Annotation::error(
                            &files[file].path,
                            AnnotationKind::Import,
                            format!("File recursively imports itself: {}", cycle.join(" -> ")),
                        )
                        .at(import.path.span),
                    );
                    for (f, _) in &stack[start..] {
                        broken[*f] = true;
                    }
                }
                Mark::Done => {}
            }
        }
    }
    order
}

/// Mark every file that imports a broken file as broken too. `order` is
/// topological, so one pass reaches the fixpoint.
fn propagate_broken(
    files: &[ParsedFile],
    deps: &[Vec<Option<usize>>],
    order: &[usize],
    broken: &mut [bool],
    annotations: &mut Vec<Annotation>,
) {
    for &i in order {
        if !broken[i] {
            mark_broken_imports(files, deps, i, broken, annotations);
        }
    }
}

/// Annotate each import of file `i` that points at a broken file. Returns
/// whether there was any, in which case `i` is now broken as well.
fn mark_broken_imports(
    files: &[ParsedFile],
    deps: &[Vec<Option<usize>>],
    i: usize,
    broken: &mut [bool],
    annotations: &mut Vec<Annotation>,
) -> bool {
    for (import, target) in files[i].ast.imports.iter().zip(&deps[i]) {
        if let Some(target) = target {
            if broken[*target] {
                annotations.push(
                    Annotation::error(
                        &files[i].path,
                        AnnotationKind::Import,
                        format!("Import \"{}\" was not found or had errors.", import.path.value),
                    )
                    .at(import.path.span),
                );
                broken[i] = true;
            }
        }
    }
    broken[i]
}
