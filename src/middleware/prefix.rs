use axum::extract::{Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;

/// Prefix injected by a reverse proxy in front of the app.
#[derive(Debug, Clone)]
pub struct BasePath(pub String);

/// Middleware removing [`BasePath`] from the request path before routing.
///
/// Must wrap the router as a service; `Router::layer` runs after routing.
///
/// ```rust,ignore
/// use tower::Layer;
///
/// let app = axum::middleware::from_fn_with_state(BasePath("/portal".into()), strip_base_path)
///     .layer(router);
/// axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;
/// ```
pub async fn strip_base_path(
    State(BasePath(prefix)): State<BasePath>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(uri) = stripped(request.uri(), &prefix) {
        *request.uri_mut() = uri;
    }
    next.run(request).await
}

fn stripped(uri: &Uri, prefix: &str) -> Option<Uri> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return None;
    }
    let rest = uri.path().strip_prefix(prefix)?;
    // Only strip whole segments: "/portal" must not match "/portalx".
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let path = if rest.is_empty() { "/" } else { rest };
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}
