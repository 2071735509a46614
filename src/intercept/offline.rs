use crate::http::Response;

pub const OFFLINE_PATH: &str = "/offline.html";

/// 离线时即时生成的兜底页面，不引用任何外部资源
pub const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline - Xpense</title>
<style>
  body { margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center;
         font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
         background: #f5f7fa; color: #1f2933; }
  .card { max-width: 360px; padding: 32px; border-radius: 12px; background: #fff;
          box-shadow: 0 4px 16px rgba(0, 0, 0, 0.08); text-align: center; }
  h1 { font-size: 1.4rem; margin: 0 0 12px; }
  p { line-height: 1.5; color: #52606d; }
  button { margin-top: 16px; padding: 10px 24px; border: 0; border-radius: 8px;
           background: #2563eb; color: #fff; font-size: 1rem; cursor: pointer; }
</style>
</head>
<body>
<div class="card">
  <h1>You're offline</h1>
  <p>Xpense can't reach the network right now. Your data is safe and this page will reload when you're back online.</p>
  <button id="retry" type="button" onclick="window.location.reload()">Retry</button>
</div>
<script>
  window.addEventListener('online', function () { window.location.reload(); });
</script>
</body>
</html>
"#;

pub fn offline_page() -> Response {
    Response::new(200, OFFLINE_HTML)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_header("cache-control", "no-store")
}
