//! End-to-end behavior of the request pipeline, driven in memory.

use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use picodot::http::Response;
use picodot::testing::TestClient;
use picodot::{Config, Error, ErrorClass, Json, Method, Request, Router, abort};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("arithmetic error")]
struct ArithmeticError;

impl ErrorClass for ArithmeticError {}

#[derive(Debug, thiserror::Error)]
#[error("division by zero")]
struct ZeroDivision;

impl ErrorClass for ZeroDivision {
    fn ancestors() -> Vec<TypeId> {
        vec![TypeId::of::<ArithmeticError>()]
    }
}

#[tokio::test]
async fn hello_world() {
    let mut router = Router::new();
    router.get("/", |_req| async { "Hello, World!" }).unwrap();
    let mut client = TestClient::new(router);

    let res = client.get("/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.headers.get("Content-Length"), Some("13"));
    assert_eq!(
        res.headers.get("Content-Type"),
        Some("text/plain; charset=UTF-8")
    );
    assert_eq!(res.text(), Some("Hello, World!"));
}

#[tokio::test]
async fn not_found_default_and_override() {
    let mut client = TestClient::new(Router::new());
    let res = client.get("/missing").await.unwrap();
    assert_eq!(res.status, 404);
    assert_eq!(res.text(), Some("Not found"));

    let mut router = Router::new();
    router.error_handler(404, |req: Option<Request>| async move {
        let path = req.map(|req| req.path().to_owned()).unwrap_or_default();
        (format!("no page at {path}"), 404)
    });
    let mut client = TestClient::new(router);
    let res = client.get("/missing").await.unwrap();
    assert_eq!(res.status, 404);
    assert_eq!(res.text(), Some("no page at /missing"));
}

#[tokio::test]
async fn error_class_lineage_picks_the_nearest_handler() {
    let mut router = Router::new();
    router
        .get("/div", |_req| async { Err::<&'static str, _>(ZeroDivision) })
        .unwrap();
    router
        .get("/parse", |_req| async {
            let n: i32 = "x".parse()?;
            Ok::<_, Error>(n.to_string())
        })
        .unwrap();
    router.exception_handler::<ArithmeticError>(|_req: Request, _err: Error| async { ("501", 501) });
    let mut client = TestClient::new(router);

    let res = client.get("/div").await.unwrap();
    assert_eq!(res.status, 501);
    assert_eq!(res.text(), Some("501"));

    // No handler for ParseIntError and no 500 handler.
    let res = client.get("/parse").await.unwrap();
    assert_eq!(res.status, 500);
    assert_eq!(res.text(), Some("Internal server error"));
}

#[tokio::test]
async fn catch_all_and_exact_class_precedence() {
    let mut router = Router::new();
    router
        .get("/div", |_req| async { Err::<&'static str, _>(ZeroDivision) })
        .unwrap();
    router.exception_handler::<Error>(|_req: Request, _err: Error| async { ("any", 500) });
    router.exception_handler::<ZeroDivision>(|_req: Request, err: Error| async move {
        (err.to_string(), 400)
    });
    let mut client = TestClient::new(router);

    let res = client.get("/div").await.unwrap();
    assert_eq!(res.status, 400);
    assert_eq!(res.text(), Some("division by zero"));
}

#[tokio::test]
async fn payload_too_large_skips_the_handler() {
    let called = Arc::new(AtomicBool::new(false));
    let mut router = Router::with_config(Config::default().max_content_length(8));
    {
        let called = Arc::clone(&called);
        router
            .post("/upload", move |_req| {
                called.store(true, Ordering::SeqCst);
                async { "stored" }
            })
            .unwrap();
    }
    let mut client = TestClient::new(router);

    let res = client.post("/upload", b"0123456789").await.unwrap();
    assert_eq!(res.status, 413);
    assert_eq!(res.text(), Some("Payload too large"));
    assert!(!called.load(Ordering::SeqCst));

    let res = client.post("/upload", b"01234567").await.unwrap();
    assert_eq!(res.status, 200);
    assert!(called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn routes_match_in_registration_order() {
    let mut router = Router::new();
    router.get("/users/<name>", |_req| async { "by name" }).unwrap();
    router.get("/users/me", |_req| async { "me" }).unwrap();
    let mut client = TestClient::new(router);

    assert_eq!(client.get("/users/me").await.unwrap().text(), Some("by name"));
}

#[tokio::test]
async fn typed_and_greedy_arguments() {
    let mut router = Router::new();
    router
        .get("/items/<int:id>", |req| async move {
            format!("item {}", req.url_args().int("id").unwrap_or_default())
        })
        .unwrap();
    router
        .get("/files/<path:rest>", |req| async move {
            req.url_args().str("rest").unwrap_or_default().to_owned()
        })
        .unwrap();
    let mut client = TestClient::new(router);

    assert_eq!(client.get("/items/-3").await.unwrap().text(), Some("item -3"));
    assert_eq!(client.get("/items/abc").await.unwrap().status, 404);
    assert_eq!(
        client.get("/files/a/b/c.txt").await.unwrap().text(),
        Some("a/b/c.txt")
    );
}

#[tokio::test]
async fn method_mismatch_is_405_not_404() {
    let mut router = Router::new();
    router.post("/items", |_req| async { "created" }).unwrap();
    router
        .route("/items", [Method::Put, Method::Delete], |_req| async { "changed" })
        .unwrap();
    let mut client = TestClient::new(router);

    let res = client.get("/items").await.unwrap();
    assert_eq!(res.status, 405);
    assert_eq!(res.text(), Some("Not found"));
    assert_eq!(res.headers.get("Allow"), Some("POST"));
    assert_eq!(client.get("/other").await.unwrap().status, 404);
}

#[tokio::test]
async fn options_lists_allowed_methods() {
    let mut router = Router::new();
    router
        .route("/a", [Method::Get, Method::Post], |_req| async { "" })
        .unwrap();
    router.post("/<x>", |_req| async { "" }).unwrap();
    let mut client = TestClient::new(router);

    let res = client.options("/a").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.headers.get("Allow"), Some("GET, POST, HEAD, OPTIONS"));
    assert!(res.body.is_empty());
}

#[tokio::test]
async fn head_has_length_but_no_body() {
    let mut router = Router::new();
    router.get("/", |_req| async { "Hello, World!" }).unwrap();
    let mut client = TestClient::new(router);

    let res = client.head("/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.headers.get("Content-Length"), Some("13"));
    assert!(res.body.is_empty());
}

#[tokio::test]
async fn before_hook_short_circuits() {
    let handled = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    {
        let handled = Arc::clone(&handled);
        router
            .get("/", move |_req| {
                handled.fetch_add(1, Ordering::SeqCst);
                async { "secret" }
            })
            .unwrap();
    }
    router.before_request(|req| async move {
        if req.headers().get("Authorization").is_none() {
            return Some(("denied", 401));
        }
        req.g().insert(String::from("alice"));
        None
    });
    router.after_request(|req, res| async move {
        let user = req.g().get::<String>().cloned().unwrap_or_default();
        res.header("X-User", user)
    });
    let mut client = TestClient::new(router);

    let res = client.get("/").await.unwrap();
    assert_eq!(res.status, 401);
    assert_eq!(res.headers.get("X-User"), Some(""));
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    let res = client
        .request(Method::Get, "/", &[("Authorization", "token")], b"")
        .await
        .unwrap();
    assert_eq!(res.text(), Some("secret"));
    assert_eq!(res.headers.get("X-User"), Some("alice"));
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn after_and_after_error_hooks_are_disjoint() {
    let mut router = Router::new();
    router.get("/ok", |_req| async { "fine" }).unwrap();
    router
        .get("/fail", |_req| async { Err::<&'static str, _>(abort(409)) })
        .unwrap();
    router
        .get("/per-request", |req: Request| async move {
            req.after_request(|_req, res| async move { res.header("X-Once", "1") });
            "fine"
        })
        .unwrap();
    router.after_request(|_req, res| async move { res.header("X-After", "1") });
    router.after_error_request(|_req, res| async move { res.header("X-After-Error", "1") });
    let mut client = TestClient::new(router);

    let res = client.get("/ok").await.unwrap();
    assert_eq!(res.headers.get("X-After"), Some("1"));
    assert_eq!(res.headers.get("X-After-Error"), None);

    for path in ["/fail", "/missing"] {
        let res = client.get(path).await.unwrap();
        assert_eq!(res.headers.get("X-After"), None);
        assert_eq!(res.headers.get("X-After-Error"), Some("1"));
    }
    let res = client.get("/fail").await.unwrap();
    assert_eq!(res.status, 409);
    assert_eq!(res.text(), Some("409 error"));

    let res = client.get("/per-request").await.unwrap();
    assert_eq!(res.headers.get("X-Once"), Some("1"));
    assert_eq!(client.get("/ok").await.unwrap().headers.get("X-Once"), None);
}

#[tokio::test]
async fn bad_request_reaches_after_error_hooks_without_a_request() {
    let mut router = Router::new();
    router.after_error_request(|req: Option<Request>, res: Response| async move {
        res.header("X-Had-Request", if req.is_some() { "yes" } else { "no" })
    });
    let client = TestClient::new(router);

    let res = client.send_raw(b"BROKEN\r\n\r\n".to_vec()).await.unwrap();
    assert_eq!(res.status, 400);
    assert_eq!(res.text(), Some("Bad request"));
    assert_eq!(res.headers.get("X-Had-Request"), Some("no"));
}

fn tagging_router(tag: &'static str) -> Router {
    let mut sub = Router::new();
    sub.get("/ping", |req| async move { req.url_prefix().to_owned() })
        .unwrap();
    sub.get("/gone", |_req| async { Err::<&'static str, _>(abort(410)) })
        .unwrap();
    sub.before_request(move |req| async move {
        req.g().insert(tag);
    });
    sub.after_request(move |req, res| async move {
        let seen = req.g().get::<&'static str>().copied().unwrap_or("-");
        res.header("X-Tag", seen)
    });
    sub.error_handler(410, move |_req| async move { (format!("{tag} gone"), 410) });
    sub
}

#[tokio::test]
async fn local_mount_keeps_hooks_private() {
    let mut app = Router::new();
    app.get("/home", |_req| async { "home" }).unwrap();
    app.get("/gone", |_req| async { Err::<&'static str, _>(abort(410)) })
        .unwrap();
    app.mount(tagging_router("api"), "/api", true).unwrap();
    let mut client = TestClient::new(app);

    let res = client.get("/api/ping").await.unwrap();
    assert_eq!(res.text(), Some("/api"));
    assert_eq!(res.headers.get("X-Tag"), Some("api"));
    assert_eq!(client.get("/api/gone").await.unwrap().text(), Some("api gone"));

    let res = client.get("/home").await.unwrap();
    assert_eq!(res.headers.get("X-Tag"), None);
    assert_eq!(client.get("/gone").await.unwrap().text(), Some("410 error"));
}

#[tokio::test]
async fn non_local_mount_joins_the_parent_chains() {
    let mut app = Router::new();
    app.get("/home", |_req| async { "home" }).unwrap();
    app.get("/gone", |_req| async { Err::<&'static str, _>(abort(410)) })
        .unwrap();
    app.mount(tagging_router("shared"), "/sub", false).unwrap();
    let mut client = TestClient::new(app);

    let res = client.get("/home").await.unwrap();
    assert_eq!(res.headers.get("X-Tag"), Some("shared"));
    assert_eq!(client.get("/gone").await.unwrap().text(), Some("shared gone"));
    assert_eq!(client.get("/sub/ping").await.unwrap().text(), Some("/sub"));
}

#[tokio::test]
async fn nested_local_scopes_run_outermost_first() {
    let mut inner = Router::new();
    inner.get("/leaf", |req| async move {
        req.g().get::<Vec<&'static str>>().cloned().unwrap_or_default().join(",")
    })
    .unwrap();
    inner.before_request(|req| async move {
        if let Some(trail) = req.g().get_mut::<Vec<&'static str>>() {
            trail.push("inner");
        }
    });

    let mut outer = Router::new();
    outer.before_request(|req| async move {
        if let Some(trail) = req.g().get_mut::<Vec<&'static str>>() {
            trail.push("outer");
        }
    });
    outer.mount(inner, "/in", true).unwrap();

    let mut app = Router::new();
    app.before_request(|req| async move {
        req.g().insert(vec!["app"]);
    });
    app.mount(outer, "/out", true).unwrap();
    let mut client = TestClient::new(app);

    let res = client.get("/out/in/leaf").await.unwrap();
    assert_eq!(res.text(), Some("app,outer,inner"));
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Item {
    name: String,
    qty: u32,
}

#[tokio::test]
async fn json_in_and_out() {
    let mut router = Router::new();
    router
        .post("/items", |req| async move {
            let Some(mut item) = req.json::<Item>()? else {
                return Err(abort_unsupported());
            };
            item.qty *= 2;
            Ok((Json(item), 201))
        })
        .unwrap();
    let mut client = TestClient::new(router);

    let res = client
        .post_json("/items", &Item { name: "bolt".into(), qty: 2 })
        .await
        .unwrap();
    assert_eq!(res.status, 201);
    assert_eq!(
        res.headers.get("Content-Type"),
        Some("application/json; charset=UTF-8")
    );
    let item: Item = res.json().unwrap();
    assert_eq!(item, Item { name: "bolt".into(), qty: 4 });

    assert_eq!(client.post("/items", b"qty=1").await.unwrap().status, 415);
}

fn abort_unsupported() -> Error {
    abort(415)
}

#[tokio::test]
async fn query_and_form_arguments() {
    let mut router = Router::new();
    router
        .get("/search", |req| async move {
            let terms: Vec<_> = req.args().get_all("q").collect();
            terms.join("|")
        })
        .unwrap();
    router
        .post("/form", |req| async move {
            let form = req.form()?.unwrap_or_default();
            Ok::<_, Error>(form.get("name").unwrap_or("?").to_owned())
        })
        .unwrap();
    let mut client = TestClient::new(router);

    assert_eq!(
        client.get("/search?q=a+b&q=%41").await.unwrap().text(),
        Some("a b|A")
    );
    let res = client
        .request(
            Method::Post,
            "/form",
            &[("Content-Type", "application/x-www-form-urlencoded")],
            b"name=J%C3%BCrgen",
        )
        .await
        .unwrap();
    assert_eq!(res.text(), Some("Jürgen"));
}

#[tokio::test]
async fn handler_panic_is_a_500() {
    let mut router = Router::new();
    router
        .get("/boom", |_req| async {
            let items: Vec<u8> = Vec::new();
            items[3].to_string()
        })
        .unwrap();
    router.after_error_request(|_req, res| async move { res.header("X-Recovered", "1") });
    let mut client = TestClient::new(router);

    let res = client.get("/boom").await.unwrap();
    assert_eq!(res.status, 500);
    assert_eq!(res.headers.get("X-Recovered"), Some("1"));
}

#[tokio::test]
async fn redirect_and_unit_responses() {
    let mut router = Router::new();
    router
        .get("/old", |_req| async { Response::redirect("/new", 302) })
        .unwrap();
    router.delete("/thing", |_req| async {}).unwrap();
    let mut client = TestClient::new(router);

    let res = client.get("/old").await.unwrap();
    assert_eq!(res.status, 302);
    assert_eq!(res.headers.get("Location"), Some("/new"));

    let res = client.delete("/thing").await.unwrap();
    assert_eq!(res.status, 204);
    assert!(res.body.is_empty());
}
