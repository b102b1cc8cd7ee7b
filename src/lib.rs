mod cache;
mod config;
mod database;
mod db;
mod error;
mod maintenance;
mod middleware;
mod models;
mod routes;
mod service;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use maintenance::{ExpireSessionsResult, expire_sessions};

use crate::cache::TtlCache;
use crate::database::session::SessionRepository;
use crate::db::{stage_cache, stage_store};
use crate::middleware::RequestLogger;
use crate::middleware::rate_limit::RateLimiter;
use crate::routes as app_routes;
use crate::service::conversation::{ConversationService, ConversationSettings};
use crate::service::guardrail::KeywordInspector;
use crate::service::tavus::TavusClient;
use crate::service::webhook::WebhookService;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Later calls are ignored so tests can build several
/// rockets in one process.
pub fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG overrides the configured level, e.g. RUST_LOG=info,leadbooth::service=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    let _ = if json_format {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
}

fn build_cors(cors_config: &config::CorsConfig) -> CorsOptions {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    if is_wildcard && cors_config.allow_credentials {
        panic!(
            "Invalid CORS configuration: Cannot use wildcard origins (*) with credentials enabled. \
            Either set specific origins or disable credentials."
        );
    }

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Accept", "X-Request-Id"]),
        expose_headers: ["X-Request-Id", "Retry-After"].iter().map(|h| h.to_string()).collect(),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    }
}

fn get_swagger_config(openapi_url: &str) -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: openapi_url.to_string(),
        ..Default::default()
    }
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (conversation_routes, conversation_openapi) = app_routes::conversation::routes();
    let (session_routes, session_openapi) = app_routes::session::routes();

    vec![
        RouteSpec {
            path: "/conversations",
            routes: conversation_routes,
            openapi: conversation_openapi,
        },
        RouteSpec {
            path: "/sessions",
            routes: session_routes,
            openapi: session_openapi,
        },
    ]
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, enable_swagger: bool) -> Rocket<Build> {
    let route_specs = collect_route_specs();

    if enable_swagger {
        let mut openapi_list = Vec::new();
        for spec in route_specs {
            rocket = rocket.mount(format!("{}{}", base_path, spec.path), spec.routes);
            openapi_list.push((spec.path, spec.openapi));
        }

        match marge_spec_list(&openapi_list) {
            Ok(openapi_docs) => {
                let settings = rocket_okapi::settings::OpenApiSettings::default();
                rocket = rocket.mount(base_path, vec![get_openapi_route(openapi_docs, &settings)]);

                let docs_path = join_base_path(base_path, "docs");
                let openapi_url = join_base_path(base_path, "openapi.json");
                rocket = rocket.mount(docs_path, make_swagger_ui(&get_swagger_config(&openapi_url)));
            }
            Err(err) => tracing::error!("Could not merge OpenAPI spec, docs disabled: {}", err),
        }
    } else {
        for spec in route_specs {
            rocket = rocket.mount(format!("{}{}", base_path, spec.path), spec.routes);
        }
    }

    // Vendor-facing; kept out of the public API docs.
    rocket.mount(join_base_path(base_path, "webhook"), app_routes::webhook::routes())
}

fn stage_rate_limiter(rate_limit_config: config::RateLimitConfig) -> AdHoc {
    AdHoc::try_on_ignite("Rate Limiter", move |rocket| async move {
        let Some(cache) = rocket.state::<Arc<dyn TtlCache>>().cloned() else {
            tracing::error!("Rate limiter needs the TTL cache to be staged first");
            return Err(rocket);
        };

        let limiter = Arc::new(RateLimiter::new(rate_limit_config, cache));
        Ok(rocket.manage(limiter))
    })
}

fn stage_services(config: Config, api_base_path: String) -> AdHoc {
    AdHoc::try_on_ignite("Booth services", move |rocket| async move {
        let (Some(repository), Some(cache)) = (
            rocket.state::<Arc<dyn SessionRepository>>().cloned(),
            rocket.state::<Arc<dyn TtlCache>>().cloned(),
        ) else {
            tracing::error!("Services need the session store and TTL cache to be staged first");
            return Err(rocket);
        };

        if !config.has_api_key() {
            tracing::warn!("TAVUS_API_KEY is not set; conversation creation will fail until it is configured");
        }
        if config.tavus.persona_id.as_deref().is_none_or(|p| p.trim().is_empty()) {
            tracing::warn!("TAVUS_PERSONA_ID is not set; conversation creation will be rejected");
        }

        let vendor = match TavusClient::new(&config.tavus) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(error = ?e, "Failed to build Tavus client");
                return Err(rocket);
            }
        };

        let inspector = match KeywordInspector::new(&config.guardrail.forbidden_terms) {
            Ok(inspector) => {
                if !inspector.is_enabled() {
                    tracing::info!("No guardrail terms configured; transcript inspection is off");
                }
                Arc::new(inspector)
            }
            Err(e) => {
                tracing::error!(error = ?e, "Invalid guardrail configuration");
                return Err(rocket);
            }
        };

        let conversations = Arc::new(ConversationService::new(
            repository.clone(),
            vendor,
            ConversationSettings::from_config(&config, &api_base_path),
        ));
        let webhooks = Arc::new(WebhookService::new(repository, cache, inspector, &config));

        Ok(rocket.manage(conversations).manage(webhooks))
    })
}

pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);

    let cors = build_cors(&config.cors).to_cors().expect("Failed to create CORS fairing");

    let base_path = normalize_base_path(&config.api.base_path);

    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));

    let mut rocket = rocket::custom(figment)
        .attach(cors)
        .attach(RequestLogger)
        .attach(stage_store(config.storage.clone()))
        .attach(stage_cache(config.cache.clone()))
        .attach(stage_rate_limiter(config.rate_limit.clone()))
        .attach(stage_services(config.clone(), base_path.clone()));

    rocket = mount_api_routes(rocket, &base_path, config.api.enable_swagger);
    rocket = rocket.mount("/", app_routes::health::routes());

    rocket.register("/", app_routes::error::catchers())
}
