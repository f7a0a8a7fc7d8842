//! Renders the client-side redirector page a `geoTarget` route emits
//! (spec.md §4.5, §9 "`geoTarget` output is a client-side HTML redirector,
//! not a server-side decision"): the server can't see the visitor's
//! geo-resolved country on its own (that's set by an external module into
//! a `countryCode` cookie), so the response is a minimal HTML+script page
//! that performs the 2-letter-code / region / continent / fallback chain
//! in the browser, with a `<noscript>` meta-refresh for clients without
//! JavaScript.

use std::collections::HashMap;

use junction_core::config::geo;

/// Build the self-contained HTML page for a `geoTarget` redirect.
///
/// `geo_target` is the route's declared map (country code, region name, or
/// continent name -> destination URL); `fallback` is `route.redirect`, used
/// when none of those keys resolves.
pub fn render(geo_target: &HashMap<String, String>, fallback: &str) -> String {
    let geo_target_json = serde_json::to_string(geo_target).unwrap_or_else(|_| "{}".to_string());
    let country_to_region_json =
        serde_json::to_string(&geo::country_to_region()).unwrap_or_else(|_| "{}".to_string());
    let country_to_continent_json =
        serde_json::to_string(&geo::country_to_continent()).unwrap_or_else(|_| "{}".to_string());
    let fallback_json = serde_json::to_string(fallback).unwrap_or_else(|_| "\"/\"".to_string());

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Redirecting&hellip;</title>
<noscript><meta http-equiv="refresh" content="0;url={fallback_attr}"></noscript>
</head>
<body>
<script>
(function() {{
  var geoTarget = {geo_target_json};
  var countryToRegion = {country_to_region_json};
  var countryToContinent = {country_to_continent_json};
  var fallback = {fallback_json};

  function cookie(name) {{
    var match = document.cookie.match(new RegExp('(?:^|; )' + name + '=([^;]*)'));
    return match ? decodeURIComponent(match[1]) : null;
  }}

  var cc = (cookie('countryCode') || '').toUpperCase();
  var target = geoTarget[cc]
    || geoTarget[countryToRegion[cc]]
    || geoTarget[countryToContinent[cc]]
    || fallback;

  window.location.replace(target);
}})();
</script>
</body>
</html>
"#,
        fallback_attr = html_escape_attr(fallback),
        geo_target_json = geo_target_json,
        country_to_region_json = country_to_region_json,
        country_to_continent_json = country_to_continent_json,
        fallback_json = fallback_json,
    )
}

fn html_escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}
