//! The operation table and its handlers.
//!
//! Each handler validates its own parameters, obtains the decompiler through
//! the liveness-checked [`ToolContext::decompiler`] and builds the success
//! body. Errors are [`ToolError`]s; the dispatcher turns them into envelopes.

use rayon::prelude::*;
use serde_json::{Map, Value, json};

use crate::error::{ToolError, ToolResultExt};
use crate::extract::{MethodQuery, extract_method};
use crate::model::{ClassRef, Decompiler, MANIFEST_ENTRIES, ResourceContent, ResourceKind};

pub const DEFAULT_PAGE_LIMIT: i64 = 250;
pub const MAX_PAGE_LIMIT: i64 = 500;

pub type Handler = fn(&ToolContext<'_>, &Params<'_>) -> Result<Value, ToolError>;

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    /// `"int"` or `"string"`, as advertised by `/tools`.
    pub type_hint: &'static str,
}

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static [ParamSpec],
    pub handler: Handler,
}

const fn int(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        type_hint: "int",
    }
}

const fn string(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        type_hint: "string",
    }
}

pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_android_manifest",
        description: "Returns the content of AndroidManifest.xml if available.",
        parameters: &[],
        handler: get_android_manifest,
    },
    ToolSpec {
        name: "list_all_classes",
        description: "Returns a list of all class names.",
        parameters: &[int("offset"), int("limit")],
        handler: list_all_classes,
    },
    ToolSpec {
        name: "search_class_by_name",
        description: "Search class names containing a keyword.",
        parameters: &[string("query")],
        handler: search_class_by_name,
    },
    ToolSpec {
        name: "get_class_source",
        description: "Returns the decompiled source of a class.",
        parameters: &[string("class_name")],
        handler: get_class_source,
    },
    ToolSpec {
        name: "get_methods_of_class",
        description: "Returns all method names of a class.",
        parameters: &[string("class_name")],
        handler: get_methods_of_class,
    },
    ToolSpec {
        name: "get_fields_of_class",
        description: "Returns all field names of a class.",
        parameters: &[string("class_name")],
        handler: get_fields_of_class,
    },
    ToolSpec {
        name: "search_method_by_name",
        description: "Search methods by name.",
        parameters: &[string("method_name")],
        handler: search_method_by_name,
    },
    ToolSpec {
        name: "get_method_code",
        description: "Returns the code for a specific method.",
        parameters: &[
            string("class_name"),
            string("method_name"),
            int("parameter_count"),
        ],
        handler: get_method_code,
    },
    ToolSpec {
        name: "get_all_resource_file_names",
        description: "Returns a list of all resource file names.",
        parameters: &[int("offset"), int("limit")],
        handler: get_all_resource_file_names,
    },
    ToolSpec {
        name: "get_resource_file",
        description: "Returns the content of a specific resource file.",
        parameters: &[string("resource_name")],
        handler: get_resource_file,
    },
    ToolSpec {
        name: "get_class_xrefs",
        description: "Returns all references to a class.",
        parameters: &[string("class_name")],
        handler: get_class_xrefs,
    },
    ToolSpec {
        name: "get_method_xrefs",
        description: "Returns all references to a method.",
        parameters: &[string("class_name"), string("method_name")],
        handler: get_method_xrefs,
    },
    ToolSpec {
        name: "get_field_xrefs",
        description: "Returns all references to a field.",
        parameters: &[string("class_name"), string("field_name")],
        handler: get_field_xrefs,
    },
];

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Body of `GET /tools`.
pub fn tools_json() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|tool| {
            let parameters: Map<String, Value> = tool
                .parameters
                .iter()
                .map(|p| (p.name.to_string(), Value::from(p.type_hint)))
                .collect();
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": parameters,
            })
        })
        .collect();
    json!({ "tools": tools })
}

/// Per-request access to the decompiler.
pub struct ToolContext<'a> {
    decompiler: &'a dyn Decompiler,
}

impl<'a> ToolContext<'a> {
    pub fn new(decompiler: &'a dyn Decompiler) -> Self {
        Self { decompiler }
    }

    /// The decompiler, provided it is still live.
    pub fn decompiler(&self) -> Result<&'a dyn Decompiler, ToolError> {
        if self.decompiler.is_live() {
            Ok(self.decompiler)
        } else {
            Err(ToolError::Unavailable)
        }
    }
}

/// The `parameters` object of an invocation.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a>(&'a Map<String, Value>);

impl<'a> Params<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self(map)
    }

    /// A non-empty value; numbers and booleans are taken in their JSON
    /// spelling.
    pub fn required(&self, name: &str) -> Result<String, ToolError> {
        match self.0.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            _ => Err(ToolError::missing(name)),
        }
    }

    /// An integer, `None` when absent or not numeric.
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    /// Negative offsets read as 0; limits are clamped to `0..=500`.
    pub fn from_params(params: &Params<'_>) -> Self {
        let offset = params.int("offset").unwrap_or(0).max(0);
        let limit = params
            .int("limit")
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(0, MAX_PAGE_LIMIT);
        Self {
            offset: usize::try_from(offset).unwrap_or(usize::MAX),
            limit: limit as usize,
        }
    }

    pub fn slice<'t, T>(&self, items: &'t [T]) -> &'t [T] {
        let start = self.offset.min(items.len());
        let end = start.saturating_add(self.limit).min(items.len());
        &items[start..end]
    }
}

fn paged(key: &str, names: Vec<String>, params: &Params<'_>) -> Value {
    let page = Page::from_params(params);
    let mut body = Map::new();
    body.insert("total".into(), names.len().into());
    body.insert("offset".into(), page.offset.into());
    body.insert("limit".into(), page.limit.into());
    body.insert(key.into(), page.slice(&names).to_vec().into());
    Value::Object(body)
}

fn find_class(
    decompiler: &dyn Decompiler,
    class_name: &str,
    action: &str,
) -> Result<Option<ClassRef>, ToolError> {
    Ok(decompiler
        .classes()
        .or_failed(action)?
        .into_iter()
        .find(|c| c.full_name == class_name))
}

fn get_android_manifest(ctx: &ToolContext<'_>, _params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error retrieving AndroidManifest.xml";
    let decompiler = ctx.decompiler()?;

    let resources = decompiler.resources().or_failed(ACTION)?;
    let manifest = resources
        .iter()
        .filter(|r| r.kind == ResourceKind::Manifest)
        .min_by_key(|r| {
            MANIFEST_ENTRIES
                .iter()
                .position(|m| *m == r.name)
                .unwrap_or(MANIFEST_ENTRIES.len())
        })
        .ok_or_else(|| ToolError::not_found("AndroidManifest.xml not found."))?;

    match decompiler.load_resource(manifest).or_failed(ACTION)? {
        ResourceContent::Text(text) if !text.is_empty() => Ok(json!({ "manifest": text })),
        _ => Err(ToolError::Unreadable(
            "Manifest content is empty or could not be decoded.".into(),
        )),
    }
}

fn list_all_classes(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    let classes = ctx
        .decompiler()?
        .classes_with_inners()
        .or_failed("Error retrieving classes")?;
    let names = classes.into_iter().map(|c| c.full_name).collect();
    Ok(paged("classes", names, params))
}

fn search_class_by_name(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    let query = params.required("query")?.to_lowercase();
    let results: Vec<String> = ctx
        .decompiler()?
        .classes_with_inners()
        .or_failed("Error searching classes")?
        .into_iter()
        .map(|c| c.full_name)
        .filter(|name| name.to_lowercase().contains(&query))
        .collect();
    Ok(json!({ "query": query, "results": results }))
}

fn get_class_source(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error fetching class";
    let class_name = params.required("class_name")?;
    let decompiler = ctx.decompiler()?;

    let class = find_class(decompiler, &class_name, ACTION)?
        .ok_or_else(|| ToolError::not_found(format!("Class not found: {class_name}")))?;
    let source = decompiler.class_code(&class).or_failed(ACTION)?;
    Ok(json!({ "class_name": class_name, "source": source }))
}

fn get_methods_of_class(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error fetching methods";
    let class_name = params.required("class_name")?;
    let decompiler = ctx.decompiler()?;

    let class = find_class(decompiler, &class_name, ACTION)?
        .ok_or_else(|| ToolError::not_found(format!("Class not found: {class_name}")))?;
    let methods: Vec<String> = decompiler
        .methods(&class)
        .or_failed(ACTION)?
        .into_iter()
        .map(|m| m.name)
        .collect();
    Ok(json!({ "class_name": class_name, "methods": methods }))
}

fn get_fields_of_class(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error fetching fields";
    let class_name = params.required("class_name")?;
    let decompiler = ctx.decompiler()?;

    let class = find_class(decompiler, &class_name, ACTION)?
        .ok_or_else(|| ToolError::not_found(format!("Class not found: {class_name}")))?;
    let fields: Vec<String> = decompiler
        .fields(&class)
        .or_failed(ACTION)?
        .into_iter()
        .map(|f| f.name)
        .collect();
    Ok(json!({ "class_name": class_name, "fields": fields }))
}

fn search_method_by_name(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error searching methods";
    let method_name = params.required("method_name")?;
    let needle = method_name.to_lowercase();
    let decompiler = ctx.decompiler()?;

    let classes = decompiler.classes().or_failed(ACTION)?;
    let per_class = classes
        .par_iter()
        .map(|class| -> anyhow::Result<Vec<Value>> {
            decompiler.decompile(class)?;
            Ok(decompiler
                .methods(class)?
                .into_iter()
                .filter(|m| m.name.to_lowercase().contains(&needle))
                .map(|m| json!({ "class_name": class.full_name, "method_name": m.name }))
                .collect())
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .or_failed(ACTION)?;
    let results: Vec<Value> = per_class.into_iter().flatten().collect();

    if results.is_empty() {
        return Ok(json!({
            "query": method_name,
            "results": results,
            "message": format!("No methods found for: {method_name}"),
        }));
    }
    Ok(json!({ "query": method_name, "results": results }))
}

fn get_method_code(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error fetching method code";
    let class_name = params.required("class_name")?;
    let method_name = params.required("method_name")?;
    let arity = params
        .int("parameter_count")
        .and_then(|n| usize::try_from(n).ok());
    let decompiler = ctx.decompiler()?;

    let class = find_class(decompiler, &class_name, ACTION)?
        .ok_or_else(|| ToolError::not_found(format!("Class '{class_name}' not found")))?;
    decompiler.decompile(&class).or_failed(ACTION)?;

    let method = decompiler
        .methods(&class)
        .or_failed(ACTION)?
        .into_iter()
        .find(|m| m.name == method_name && arity.is_none_or(|n| m.parameter_count() == n))
        .ok_or_else(|| {
            ToolError::not_found(format!(
                "Method '{method_name}' not found in class '{class_name}'"
            ))
        })?;

    let own_code = decompiler.method_code(&method).or_failed(ACTION)?;
    let code = match own_code {
        Some(code) if !code.trim().is_empty() => code,
        own_code => {
            let class_code = decompiler.class_code(&class).or_failed(ACTION)?;
            match extract_method(&MethodQuery::from(&method), &class_code) {
                Some(extracted) if !extracted.trim().is_empty() => extracted.to_string(),
                _ => own_code.unwrap_or_default(),
            }
        }
    };

    Ok(json!({
        "class_name": class_name,
        "method_name": method_name,
        "code": code,
    }))
}

fn get_all_resource_file_names(
    ctx: &ToolContext<'_>,
    params: &Params<'_>,
) -> Result<Value, ToolError> {
    let resources = ctx
        .decompiler()?
        .resources()
        .or_failed("Error retrieving resource names")?;
    let names = resources.into_iter().map(|r| r.name).collect();
    Ok(paged("resources", names, params))
}

fn get_resource_file(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error retrieving resource";
    let resource_name = params.required("resource_name")?;
    let decompiler = ctx.decompiler()?;

    let entry = decompiler
        .resources()
        .or_failed(ACTION)?
        .into_iter()
        .find(|r| r.name == resource_name)
        .ok_or_else(|| ToolError::not_found(format!("Resource not found: {resource_name}")))?;

    match decompiler.load_resource(&entry).or_failed(ACTION)? {
        ResourceContent::Text(text) if text.is_empty() => {
            Err(ToolError::Unreadable("Resource content is empty.".into()))
        }
        ResourceContent::Text(text) => Ok(json!({
            "resource_name": resource_name,
            "content": text,
        })),
        ResourceContent::Binary(_) => Err(ToolError::Unreadable(
            "Unsupported resource type: binary".into(),
        )),
    }
}

fn get_class_xrefs(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error fetching class xrefs";
    let class_name = params.required("class_name")?;
    let decompiler = ctx.decompiler()?;

    let class = find_class(decompiler, &class_name, ACTION)?
        .ok_or_else(|| ToolError::not_found(format!("Class not found: {class_name}")))?;
    let xrefs = decompiler.class_usages(&class).or_failed(ACTION)?;
    Ok(json!({ "class_name": class_name, "xrefs": xrefs }))
}

fn get_method_xrefs(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error fetching method xrefs";
    let class_name = params.required("class_name")?;
    let method_name = params.required("method_name")?;
    let decompiler = ctx.decompiler()?;

    let class = find_class(decompiler, &class_name, ACTION)?
        .ok_or_else(|| ToolError::not_found(format!("Class '{class_name}' not found")))?;
    let method = decompiler
        .methods(&class)
        .or_failed(ACTION)?
        .into_iter()
        .find(|m| m.name == method_name)
        .ok_or_else(|| {
            ToolError::not_found(format!(
                "Method '{method_name}' not found in class '{class_name}'"
            ))
        })?;
    let xrefs = decompiler.method_usages(&method).or_failed(ACTION)?;
    Ok(json!({
        "class_name": class_name,
        "method_name": method_name,
        "xrefs": xrefs,
    }))
}

fn get_field_xrefs(ctx: &ToolContext<'_>, params: &Params<'_>) -> Result<Value, ToolError> {
    const ACTION: &str = "Error fetching field xrefs";
    let class_name = params.required("class_name")?;
    let field_name = params.required("field_name")?;
    let decompiler = ctx.decompiler()?;

    let class = find_class(decompiler, &class_name, ACTION)?
        .ok_or_else(|| ToolError::not_found(format!("Class '{class_name}' not found")))?;
    let field = decompiler
        .fields(&class)
        .or_failed(ACTION)?
        .into_iter()
        .find(|f| f.name == field_name)
        .ok_or_else(|| {
            ToolError::not_found(format!(
                "Field '{field_name}' not found in class '{class_name}'"
            ))
        })?;
    let xrefs = decompiler.field_usages(&field).or_failed(ACTION)?;
    Ok(json!({
        "class_name": class_name,
        "field_name": field_name,
        "xrefs": xrefs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn table_names_are_unique_and_advertised() {
        let mut names: Vec<&str> = TOOLS.iter().map(|t| t.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 13);

        let listed = tools_json();
        let tools = listed["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 13);
        assert_eq!(tools[1]["name"], "list_all_classes");
        assert_eq!(tools[1]["parameters"]["limit"], "int");
        assert_eq!(tools[7]["parameters"]["method_name"], "string");
        assert!(tools[0]["parameters"].as_object().unwrap().is_empty());
    }

    #[test]
    fn required_rejects_missing_null_and_empty() {
        let map = params(json!({ "a": "", "b": null, "c": "x", "d": 7 }));
        let p = Params::new(&map);
        assert_eq!(p.required("a"), Err(ToolError::missing("a")));
        assert_eq!(p.required("b"), Err(ToolError::missing("b")));
        assert_eq!(p.required("z"), Err(ToolError::missing("z")));
        assert_eq!(p.required("c").unwrap(), "x");
        assert_eq!(p.required("d").unwrap(), "7");
    }

    #[test]
    fn page_defaults_and_clamps() {
        let empty = Map::new();
        assert_eq!(
            Page::from_params(&Params::new(&empty)),
            Page {
                offset: 0,
                limit: 250
            }
        );

        let map = params(json!({ "offset": -4, "limit": 10_000 }));
        assert_eq!(
            Page::from_params(&Params::new(&map)),
            Page {
                offset: 0,
                limit: 500
            }
        );

        let map = params(json!({ "offset": "2", "limit": "nope" }));
        let page = Page::from_params(&Params::new(&map));
        assert_eq!(page.offset, 2);
        assert_eq!(page.limit, 250);
    }

    #[test]
    fn page_slice_handles_offset_beyond_end() {
        let items = [1, 2, 3, 4, 5];
        let page = Page {
            offset: 3,
            limit: 10,
        };
        assert_eq!(page.slice(&items), &[4, 5]);

        let page = Page {
            offset: 5,
            limit: 10,
        };
        assert!(page.slice(&items).is_empty());

        let page = Page {
            offset: usize::MAX,
            limit: 500,
        };
        assert!(page.slice(&items).is_empty());
    }
}
