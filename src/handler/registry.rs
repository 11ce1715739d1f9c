//! Versioned handler registry.
//!
//! Handlers are registered into a [`RegistryBuilder`] at startup. Each
//! registration validates the whole handler (version numbering, companion
//! declarations, request schemas, structure ownership, declared errors)
//! before committing anything, so a failed registration leaves the builder
//! untouched. [`RegistryBuilder::finish`] runs the cross-handler checks and
//! produces an immutable [`Registry`] that is safe to share between tasks.
//!
//! A handler defined in module `app::handlers::users::profile` with
//! handlers root `app::handlers` gets the path `/users/profile`, and its
//! versions the routes `/users/profile/v1/`, `/users/profile/v2/`, ...
//!
//! # Example
//!
//! ```ignore
//! let mut builder = RegistryBuilder::new(RegistryConfig::new("app::handlers"));
//! builder.register(Users::new())?;
//! let registry = builder.finish()?;
//!
//! let version = registry.find_handler_by_route("/users/v1").unwrap();
//! assert_eq!(version.number(), 1);
//! ```

use std::any::{type_name, Any};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use super::methods::{ErasedMethod, ErrorsEntry, VersionEntry};
use super::{ErrorSlot, ErrorsVar, Handler, MethodDescriptor, MethodSet};
use crate::error::{HandlerError, Location, RegistrationError};
use crate::schema::{
    check_ownership, derive_request_schema, ParameterDoc, RequestSchema, StructureUsage, TypeDesc,
};

static METHOD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^V([1-9][0-9]*)([A-Za-z]*)$").expect("method name pattern compiles")
});

/// Opaque per-version data returned by the registration observer.
pub type ExtraData = Arc<dyn Any + Send + Sync>;

/// Called once per version after its handler passed validation.
pub type RegistrationObserver =
    Arc<dyn Fn(&MethodDescriptor) -> Option<ExtraData> + Send + Sync>;

/// What [`RegistryBuilder::finish`] does about structures shared between
/// handler versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharedStructurePolicy {
    /// Fail with [`RegistrationError::SharedStructures`].
    #[default]
    Deny,
    /// Log a warning per shared structure and continue.
    Warn,
}

/// Registry configuration.
#[derive(Clone)]
pub struct RegistryConfig {
    handlers_root: String,
    shared_structures: SharedStructurePolicy,
    on_version_registered: Option<RegistrationObserver>,
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("handlers_root", &self.handlers_root)
            .field("shared_structures", &self.shared_structures)
            .field("on_version_registered", &self.on_version_registered.is_some())
            .finish()
    }
}

impl RegistryConfig {
    /// `handlers_root` is the module path handler paths are relative to.
    pub fn new(handlers_root: impl Into<String>) -> Self {
        Self {
            handlers_root: handlers_root.into(),
            shared_structures: SharedStructurePolicy::default(),
            on_version_registered: None,
        }
    }

    pub fn shared_structures(mut self, policy: SharedStructurePolicy) -> Self {
        self.shared_structures = policy;
        self
    }

    /// Install the registration observer. Its return value is stored on the
    /// version as [`Version::extra`].
    pub fn on_version_registered<F>(mut self, observer: F) -> Self
    where
        F: Fn(&MethodDescriptor) -> Option<ExtraData> + Send + Sync + 'static,
    {
        self.on_version_registered = Some(Arc::new(observer));
        self
    }

    #[inline]
    pub fn handlers_root(&self) -> &str {
        &self.handlers_root
    }
}

/// One registered version of a handler.
pub struct Version {
    number: u32,
    name: String,
    route: String,
    handler_path: String,
    request: RequestSchema,
    response: TypeDesc,
    errors: Vec<HandlerError>,
    use_cache: bool,
    flat_request: bool,
    extra_arg: Option<&'static str>,
    extra: Option<ExtraData>,
    pub(crate) method: Arc<dyn ErasedMethod>,
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("route", &self.route)
            .field("request", &self.request.ty.name)
            .field("response", &self.response.name)
            .field("use_cache", &self.use_cache)
            .field("flat_request", &self.flat_request)
            .finish_non_exhaustive()
    }
}

impl Version {
    /// Version number, starting at 1.
    #[inline]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Lowercase version name, e.g. `v2`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route with trailing slash, e.g. `/users/v2/`.
    #[inline]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Path of the owning handler, e.g. `/users`.
    #[inline]
    pub fn handler_path(&self) -> &str {
        &self.handler_path
    }

    /// Parameter schema derived from the request type.
    pub fn request(&self) -> &RequestSchema {
        &self.request
    }

    /// Description of the response type.
    pub fn response(&self) -> &TypeDesc {
        &self.response
    }

    /// Declared errors, in declaration order.
    pub fn errors(&self) -> &[HandlerError] {
        &self.errors
    }

    /// Whether the version was declared with `V<n>UseCache`.
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    /// Whether the version was declared with `V<n>ConsumeFlatRequest`.
    pub fn consumes_flat_request(&self) -> bool {
        self.flat_request
    }

    /// Type name of the extra argument the method takes, if any.
    pub fn extra_arg(&self) -> Option<&'static str> {
        self.extra_arg
    }

    /// Data returned by the registration observer, if one is installed.
    pub fn extra(&self) -> Option<&ExtraData> {
        self.extra.as_ref()
    }

    /// Observer data downcast to a concrete type.
    pub fn extra_as<T: Any>(&self) -> Option<&T> {
        self.extra.as_deref().and_then(|extra| extra.downcast_ref::<T>())
    }
}

/// A registered handler and its versions.
pub struct HandlerEntity {
    path: String,
    caption: String,
    description: String,
    type_name: &'static str,
    versions: Vec<Arc<Version>>,
    instance: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for HandlerEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntity")
            .field("path", &self.path)
            .field("type_name", &self.type_name)
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

impl HandlerEntity {
    /// Path derived from the handler's module, e.g. `/users`.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Short title given by [`Handler::caption`].
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Text given by [`Handler::description`].
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Versions ordered by number, starting at 1.
    pub fn versions(&self) -> &[Arc<Version>] {
        &self.versions
    }

    /// Version `number`, if the handler has it.
    pub fn version(&self, number: u32) -> Option<&Arc<Version>> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.versions.get(index)
    }

    /// The handler instance, if it is an `H`.
    pub fn instance<H: Handler>(&self) -> Option<Arc<H>> {
        Arc::clone(&self.instance).downcast::<H>().ok()
    }
}

impl fmt::Display for HandlerEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.path, self.caption)?;
        if !self.description.is_empty() {
            writeln!(f, "  {}", self.description)?;
        }
        for version in &self.versions {
            writeln!(
                f,
                "  {} {} -> {}",
                version.route,
                version.request.ty.type_name(),
                version.response.type_name()
            )?;
            if version.use_cache {
                writeln!(f, "    cached")?;
            }
            write_docs(f, &version.request.docs(), 4)?;
            for error in &version.errors {
                writeln!(f, "    error {}: {}", error.code, error.message)?;
            }
        }
        Ok(())
    }
}

fn write_docs(f: &mut fmt::Formatter<'_>, docs: &[ParameterDoc], indent: usize) -> fmt::Result {
    for doc in docs {
        let required = if doc.required { "required" } else { "optional" };
        writeln!(
            f,
            "{:indent$}{} {} ({required}): {}",
            "", doc.key, doc.type_name, doc.description
        )?;
        if let Some(name) = &doc.recursive {
            writeln!(f, "{:width$}-> {name}", "", width = indent + 2)?;
        }
        write_docs(f, &doc.children, indent + 2)?;
    }
    Ok(())
}

/// Accumulates handler registrations.
pub struct RegistryBuilder {
    config: RegistryConfig,
    handlers: BTreeMap<String, HandlerEntity>,
    routes: HashMap<String, Arc<Version>>,
    usage: StructureUsage,
}

struct Companions<H> {
    use_cache: HashSet<u32>,
    flat: HashSet<u32>,
    errors: HashMap<u32, fn(&H) -> &dyn ErrorsVar>,
}

struct Prepared<'h, H> {
    number: u32,
    entry: VersionEntry<H>,
    request: RequestSchema,
    response: TypeDesc,
    errors: Vec<HandlerError>,
    slots: Vec<&'h ErrorSlot>,
}

impl RegistryBuilder {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            handlers: BTreeMap::new(),
            routes: HashMap::new(),
            usage: StructureUsage::default(),
        }
    }

    /// Validate and register a handler.
    ///
    /// # Panics
    ///
    /// Panics if the handler declares a removed `V<n>Errors` companion.
    pub fn register<H: Handler>(&mut self, handler: H) -> Result<(), RegistrationError> {
        self.register_shared(Arc::new(handler))
    }

    /// Like [`register`](Self::register), for an instance the caller keeps
    /// a reference to.
    pub fn register_shared<H: Handler>(&mut self, handler: Arc<H>) -> Result<(), RegistrationError> {
        let module = handler.module_path();
        let path = self.handler_path(module, type_name::<H>())?;
        if self.handlers.contains_key(&path) {
            return Err(RegistrationError::DuplicatePath(path));
        }

        let mut methods = MethodSet::new();
        H::methods(&mut methods);
        let versions = order_versions(&path, methods.versions)?;
        let count = versions.len() as u32;
        let companions = collect_companions(&path, &methods.markers, methods.errors, count)?;

        let mut usage = StructureUsage::default();
        let mut prepared = Vec::with_capacity(versions.len());
        for (number, entry) in (1..).zip(versions) {
            let request_ty = (entry.request)();
            let response = (entry.response)();
            let flat_only = companions.flat.contains(&number);
            let request = derive_request_schema(&request_ty, &[], &path, number, flat_only)?;
            check_ownership(&request_ty, module, &path, number, Location::Parameter, &mut usage)?;
            check_ownership(&response, module, &path, number, Location::ReturnValue, &mut usage)?;

            let mut errors = Vec::new();
            let mut slots = Vec::new();
            if let Some(accessor) = companions.errors.get(&number) {
                for slot in accessor(handler.as_ref()).slots() {
                    if slot.text().is_empty() {
                        return Err(RegistrationError::MissingErrorText {
                            handler: path,
                            version: number,
                            field: slot.code().to_string(),
                        });
                    }
                    errors.push(HandlerError::new(slot.code(), slot.text()));
                    slots.push(slot);
                }
            }

            prepared.push(Prepared {
                number,
                entry,
                request,
                response,
                errors,
                slots,
            });
        }

        let mut versions = Vec::with_capacity(prepared.len());
        for prepared in prepared {
            let version = self.commit_version(&path, &handler, &companions, prepared);
            self.routes.insert(version.route.clone(), Arc::clone(&version));
            versions.push(version);
        }
        self.usage.merge(usage);

        info!(handler = %path, versions = versions.len(), "handler registered");
        let entity = HandlerEntity {
            path: path.clone(),
            caption: handler.caption().to_string(),
            description: handler.description().to_string(),
            type_name: type_name::<H>(),
            versions,
            instance: handler,
        };
        self.handlers.insert(path, entity);
        Ok(())
    }

    fn commit_version<H: Handler>(
        &self,
        path: &str,
        handler: &Arc<H>,
        companions: &Companions<H>,
        prepared: Prepared<'_, H>,
    ) -> Arc<Version> {
        let Prepared {
            number,
            entry,
            request,
            response,
            errors,
            slots,
        } = prepared;

        let descriptor = MethodDescriptor {
            handler_path: path.to_string(),
            name: entry.name.clone(),
            version: number,
            request: request.ty.clone(),
            response: response.clone(),
            extra: entry.extra,
        };
        let extra = self
            .config
            .on_version_registered
            .as_ref()
            .and_then(|observer| observer(&descriptor));

        for (slot, error) in slots.into_iter().zip(&errors) {
            slot.bind(error.clone());
        }

        let use_cache = companions.use_cache.contains(&number);
        let version = Version {
            number,
            name: format!("v{number}"),
            route: format!("{path}/v{number}/"),
            handler_path: path.to_string(),
            request,
            response,
            errors,
            use_cache,
            flat_request: companions.flat.contains(&number),
            extra_arg: entry.extra,
            extra,
            method: (entry.bind)(Arc::clone(handler)),
        };
        debug!(route = %version.route, use_cache, "version registered");
        Arc::new(version)
    }

    fn handler_path(&self, module: &str, handler: &str) -> Result<String, RegistrationError> {
        let root = self.config.handlers_root.trim_end_matches("::");
        module
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix("::"))
            .filter(|rest| !rest.is_empty())
            .map(|rest| format!("/{}", rest.replace("::", "/")))
            .ok_or_else(|| RegistrationError::InvalidPath {
                handler: handler.to_string(),
                module: module.to_string(),
                root: root.to_string(),
            })
    }

    /// Run the cross-handler checks and freeze the registry.
    pub fn finish(self) -> Result<Registry, RegistrationError> {
        let shared = self.usage.shared();
        if !shared.is_empty() {
            match self.config.shared_structures {
                SharedStructurePolicy::Deny => {
                    return Err(RegistrationError::SharedStructures(shared));
                }
                SharedStructurePolicy::Warn => {
                    for structure in &shared {
                        warn!(structure = %structure.type_name, "shared structure: {structure}");
                    }
                }
            }
        }

        info!(
            handlers = self.handlers.len(),
            routes = self.routes.len(),
            "handler registry ready"
        );
        Ok(Registry {
            handlers: self.handlers,
            routes: self.routes,
        })
    }
}

fn parse_method_name(name: &str) -> Option<(u32, &str)> {
    let captures = METHOD_NAME.captures(name)?;
    let number = captures.get(1)?.as_str().parse().ok()?;
    let suffix = captures.get(2).map_or("", |m| m.as_str());
    Some((number, suffix))
}

fn order_versions<H>(
    path: &str,
    entries: Vec<VersionEntry<H>>,
) -> Result<Vec<VersionEntry<H>>, RegistrationError> {
    let mut numbered = BTreeMap::new();
    for entry in entries {
        let number = match parse_method_name(&entry.name) {
            Some((number, "")) => number,
            _ => {
                return Err(RegistrationError::InvalidMethodName {
                    handler: path.to_string(),
                    name: entry.name,
                })
            }
        };
        if numbered.contains_key(&number) {
            return Err(RegistrationError::DuplicateMethod {
                handler: path.to_string(),
                name: entry.name,
            });
        }
        numbered.insert(number, entry);
    }

    for (expected, number) in (1..).zip(numbered.keys()) {
        if *number != expected {
            return Err(RegistrationError::MissingVersion {
                handler: path.to_string(),
                missing: expected,
            });
        }
    }
    Ok(numbered.into_values().collect())
}

fn collect_companions<H>(
    path: &str,
    markers: &[String],
    errors: Vec<ErrorsEntry<H>>,
    count: u32,
) -> Result<Companions<H>, RegistrationError> {
    let unknown = |name: &str| RegistrationError::UnknownCompanion {
        handler: path.to_string(),
        name: name.to_string(),
    };
    let check_version = |name: &str, number: u32| {
        if number > count {
            return Err(RegistrationError::CompanionWithoutVersion {
                handler: path.to_string(),
                name: name.to_string(),
                version: number,
            });
        }
        Ok(number)
    };

    let mut companions = Companions {
        use_cache: HashSet::new(),
        flat: HashSet::new(),
        errors: HashMap::new(),
    };
    for name in markers {
        let Some((number, suffix)) = parse_method_name(name) else {
            return Err(unknown(name));
        };
        let target = match suffix {
            "UseCache" => &mut companions.use_cache,
            "ConsumeFlatRequest" => &mut companions.flat,
            "Errors" => panic!(
                "handler {path}: `{name}` is no longer supported, declare V{number}ErrorsVar instead"
            ),
            _ => return Err(unknown(name)),
        };
        target.insert(check_version(name, number)?);
    }

    for entry in errors {
        let number = match parse_method_name(&entry.name) {
            Some((number, "ErrorsVar")) => check_version(&entry.name, number)?,
            _ => return Err(unknown(&entry.name)),
        };
        if companions.errors.insert(number, entry.accessor).is_some() {
            return Err(RegistrationError::DuplicateMethod {
                handler: path.to_string(),
                name: entry.name,
            });
        }
    }
    Ok(companions)
}

/// Immutable set of registered handlers.
#[derive(Debug)]
pub struct Registry {
    handlers: BTreeMap<String, HandlerEntity>,
    routes: HashMap<String, Arc<Version>>,
}

impl Registry {
    /// Look up a version by route. A missing trailing slash is tolerated.
    pub fn find_handler_by_route(&self, route: &str) -> Option<&Arc<Version>> {
        if route.ends_with('/') {
            self.routes.get(route)
        } else {
            self.routes.get(&format!("{route}/"))
        }
    }

    /// Look up a version by handler path and number.
    pub fn find_handler(&self, path: &str, version: u32) -> Option<&Arc<Version>> {
        self.handlers.get(path)?.version(version)
    }

    /// Registered handler paths, sorted.
    pub fn handler_paths(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// The handler at `path`; its `Display` output is the handler's
    /// human-readable description.
    pub fn handler_info(&self, path: &str) -> Option<&HandlerEntity> {
        self.handlers.get(path)
    }

    /// Registered handlers, ordered by path.
    pub fn handlers(&self) -> impl Iterator<Item = &HandlerEntity> {
        self.handlers.values()
    }

    /// Every registered version, ordered by handler path then number.
    pub fn versions(&self) -> impl Iterator<Item = &Arc<Version>> {
        self.handlers.values().flat_map(|handler| handler.versions.iter())
    }
}
