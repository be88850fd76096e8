use crate::{Error, RemoteFetcher, Result, environment::build_environment};
use minijinja::{ErrorKind, context};
use serde_json::{Map, Value};
use stac::{Item, Validate};
use std::sync::Arc;

/// A compiled GeoTemplate.
///
/// Three rendering stages, each building on the previous: text, JSON,
/// and STAC Item. Rendering happens on a blocking worker thread because
/// the template helpers that reach out to storage are synchronous.
///
/// When `render_stac` fails the error kind reflects the first stage that
/// broke: JSON decoding, then STAC structure, then STAC validation, then
/// template runtime.
#[derive(Debug)]
pub struct GeoTemplate {
    env: Arc<minijinja::Environment<'static>>,
    name: String,
}

impl GeoTemplate {
    pub(crate) fn new(
        fetcher: Arc<dyn RemoteFetcher>,
        name: &str,
        source: String,
    ) -> Result<GeoTemplate> {
        let mut env = build_environment(fetcher);
        env.add_template_owned(name.to_string(), source)?;
        Ok(GeoTemplate {
            env: Arc::new(env),
            name: name.to_string(),
        })
    }

    /// The template's name: its URL, or `inline` for source-loaded
    /// templates.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the template against a scene.
    pub async fn render_text(&self, scene_info: &Value) -> Result<String> {
        let env = self.env.clone();
        let name = self.name.clone();
        let scene_info = scene_info.clone();
        tracing::debug!("rendering template {name}");
        let rendered = tokio::task::spawn_blocking(move || {
            let template = env.get_template(&name)?;
            template.render(context! { scene_info => scene_info })
        })
        .await?;
        rendered.map_err(classify_render_error)
    }

    /// Renders the template and parses the result as a JSON object.
    pub async fn render_json(&self, scene_info: &Value) -> Result<Map<String, Value>> {
        let text = self.render_text(scene_info).await?;
        tracing::debug!("parsing rendered text as JSON");
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(object)) => Ok(object),
            Ok(other) => Err(Error::TemplateJson(format!(
                "rendered text is not a JSON object: {other}"
            ))),
            Err(err) => Err(Error::TemplateJson(err.to_string())),
        }
    }

    /// Renders the template into a STAC Item, optionally validating it
    /// against the STAC schemas.
    pub async fn render_stac(&self, scene_info: &Value, validate: bool) -> Result<Item> {
        let object = self.render_json(scene_info).await?;
        tracing::debug!("building STAC item from JSON");
        let item: Item = serde_json::from_value(Value::Object(object))
            .map_err(|err| Error::StacType(err.to_string()))?;
        if validate {
            tracing::debug!("validating STAC item");
            // Schema retrieval inside the validator is blocking I/O.
            let candidate = item.clone();
            tokio::task::spawn_blocking(move || candidate.validate())
                .await?
                .map_err(|err| match err {
                    stac::Error::Validation(errors) => Error::StacValidation(
                        errors
                            .iter()
                            .map(|error| error.to_string())
                            .collect::<Vec<_>>()
                            .join("; "),
                    ),
                    other => Error::StacValidation(other.to_string()),
                })?;
        }
        Ok(item)
    }
}

fn classify_render_error(err: minijinja::Error) -> Error {
    match err.kind() {
        ErrorKind::MissingArgument | ErrorKind::TooManyArguments | ErrorKind::CannotUnpack => {
            Error::TemplateRuntime(format!("filter was called with invalid arguments: {err}"))
        }
        ErrorKind::InvalidOperation if err.to_string().contains("security") => {
            Error::TemplateRuntime(format!("runtime security error rendering template: {err}"))
        }
        _ => Error::TemplateRuntime(format!("error rendering template: {err:#}")),
    }
}
