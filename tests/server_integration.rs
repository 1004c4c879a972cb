use class_inspector::cfr::Cfr;
use class_inspector::dispatch::Dispatcher;
use class_inspector::server::Server;
use class_inspector::workspace::JarWorkspace;
use serde_json::{Value, json};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const FAKE_JAVA: &str = r#"#!/bin/sh
set -e
if [ "$3" != "--extraclasspath" ]; then
  echo "unexpected args: $*" >&2
  exit 1
fi
case "$5" in
  org.example.Greeter)
    cat <<'EOF'
/*
 * Decompiled with CFR 0.152.
 */
package org.example;

public class Greeter {
    private String prefix = "Hello";

    public String greet(String name) {
        return this.prefix + ", " + name;
    }

    public String greet(String name, int times) {
        StringBuilder out = new StringBuilder();
        for (int i = 0; i < times; ++i) {
            out.append(this.greet(name));
        }
        return out.toString();
    }

    @Deprecated
    public static native int checksum(byte[] data);

    static class Helper {
        void help() {
        }
    }
}
EOF
    ;;
  org.example.MainActivity)
    cat <<'EOF'
/*
 * Decompiled with CFR 0.152.
 */
package org.example;

public class MainActivity {
    public static void main(String[] args) {
        Greeter greeter = new Greeter();
        System.out.println(greeter.greet("world"));
    }
}
EOF
    ;;
  *)
    echo "no such class: $5" >&2
    exit 1
    ;;
esac
"#;

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "class_inspector_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

/// A JAR with two top-level classes, one nested class and two resources,
/// plus a fake `java` printing canned CFR output for them.
#[cfg(unix)]
fn fixture(base: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let jar = base.join("app.jar");
    write_jar(
        &jar,
        &[
            ("org/example/Greeter.class", b"\xca\xfe\xba\xbe"),
            ("org/example/Greeter$Helper.class", b"\xca\xfe\xba\xbe"),
            ("org/example/MainActivity.class", b"\xca\xfe\xba\xbe"),
            (
                "AndroidManifest.xml",
                b"<manifest package=\"org.example\"/>\n",
            ),
            ("res/raw/data.bin", b"\x00\x01\x02"),
        ],
    )?;

    let java = base.join("bin").join("java");
    write_file(&java, FAKE_JAVA)?;
    make_executable(&java)?;
    Ok((jar, java))
}

fn run_json(bin: &str, args: &[&str], envs: &[(&str, &str)]) -> anyhow::Result<Value> {
    let mut cmd = Command::new(bin);
    cmd.args(args);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let out = cmd.output()?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stdout={}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

fn http(addr: SocketAddr, raw: &str) -> anyhow::Result<Value> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(raw.as_bytes())?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| anyhow::anyhow!("no header terminator in {response:?}"))?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: application/json"));
    assert!(head.contains(&format!("Content-Length: {}", body.len())));
    assert!(head.contains("Connection: close"));
    Ok(serde_json::from_str(body)?)
}

fn post(addr: SocketAddr, body: &Value) -> anyhow::Result<Value> {
    let body = body.to_string();
    http(
        addr,
        &format!(
            "POST /invoke HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
    )
}

#[cfg(unix)]
#[test]
fn server_answers_operations_over_tcp() -> anyhow::Result<()> {
    let base = temp_dir("server_flow");
    let (jar, java) = fixture(&base)?;

    let cfr = Cfr::new(base.join("cfr.jar")).with_java_bin(java);
    let workspace = Arc::new(JarWorkspace::open(&jar, cfr, None)?);
    let server = Server::bind("127.0.0.1", 0, 2, Dispatcher::new(workspace))?;
    let addr = server.local_addr()?;
    let handle = server.start()?;

    let tools = http(addr, "GET /tools HTTP/1.1\r\n\r\n")?;
    assert_eq!(tools["tools"].as_array().map(Vec::len), Some(13));

    let missing = http(addr, "GET /elsewhere HTTP/1.1\r\n\r\n")?;
    assert_eq!(missing, json!({ "error": "Not found" }));

    let classes = post(addr, &json!({ "tool": "list_all_classes" }))?;
    assert_eq!(classes["total"], 3);
    assert_eq!(
        classes["classes"],
        json!([
            "org.example.Greeter",
            "org.example.Greeter$Helper",
            "org.example.MainActivity"
        ])
    );

    let search = post(
        addr,
        &json!({ "tool": "search_class_by_name", "parameters": { "query": "main" } }),
    )?;
    assert_eq!(search["results"], json!(["org.example.MainActivity"]));

    let methods = post(
        addr,
        &json!({
            "tool": "get_methods_of_class",
            "parameters": { "class_name": "org.example.Greeter" }
        }),
    )?;
    assert_eq!(methods["methods"], json!(["greet", "greet", "checksum"]));

    let fields = post(
        addr,
        &json!({
            "tool": "get_fields_of_class",
            "parameters": { "class_name": "org.example.Greeter" }
        }),
    )?;
    assert_eq!(fields["fields"], json!(["prefix"]));

    let overload = post(
        addr,
        &json!({
            "tool": "get_method_code",
            "parameters": {
                "class_name": "org.example.Greeter",
                "method_name": "greet",
                "parameter_count": 2
            }
        }),
    )?;
    let code = overload["code"].as_str().unwrap_or_default();
    assert!(code.starts_with("    public String greet(String name, int times) {"));
    assert!(code.ends_with("return out.toString();\n    }"));
    assert_eq!(code.matches('{').count(), code.matches('}').count());

    let native = post(
        addr,
        &json!({
            "tool": "get_method_code",
            "parameters": { "class_name": "org.example.Greeter", "method_name": "checksum" }
        }),
    )?;
    assert_eq!(
        native["code"],
        "    @Deprecated\n    public static native int checksum(byte[] data);"
    );

    let search_methods = post(
        addr,
        &json!({ "tool": "search_method_by_name", "parameters": { "method_name": "GREET" } }),
    )?;
    assert_eq!(search_methods["results"].as_array().map(Vec::len), Some(2));
    let nothing = post(
        addr,
        &json!({ "tool": "search_method_by_name", "parameters": { "method_name": "zzz" } }),
    )?;
    assert_eq!(nothing["message"], "No methods found for: zzz");

    let class_xrefs = post(
        addr,
        &json!({
            "tool": "get_class_xrefs",
            "parameters": { "class_name": "org.example.Greeter" }
        }),
    )?;
    assert_eq!(
        class_xrefs["xrefs"],
        json!([{
            "name": "MainActivity",
            "full_name": "org.example.MainActivity",
            "type": "JavaClass"
        }])
    );

    let method_xrefs = post(
        addr,
        &json!({
            "tool": "get_method_xrefs",
            "parameters": { "class_name": "org.example.Greeter", "method_name": "greet" }
        }),
    )?;
    let callers: Vec<&str> = method_xrefs["xrefs"]
        .as_array()
        .map(|a| a.iter().filter_map(|x| x["full_name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(
        callers,
        vec!["org.example.Greeter.greet", "org.example.MainActivity.main"]
    );

    let manifest = post(addr, &json!({ "tool": "get_android_manifest" }))?;
    assert_eq!(manifest["manifest"], "<manifest package=\"org.example\"/>\n");

    let resources = post(addr, &json!({ "tool": "get_all_resource_file_names" }))?;
    assert_eq!(
        resources["resources"],
        json!(["AndroidManifest.xml", "res/raw/data.bin"])
    );
    let binary = post(
        addr,
        &json!({
            "tool": "get_resource_file",
            "parameters": { "resource_name": "res/raw/data.bin" }
        }),
    )?;
    assert_eq!(binary, json!({ "error": "Unsupported resource type: binary" }));

    let unknown = post(addr, &json!({ "tool": "foo" }))?;
    assert_eq!(unknown, json!({ "error": "Unknown tool: foo" }));

    let not_found = post(
        addr,
        &json!({
            "tool": "get_class_source",
            "parameters": { "class_name": "org.example.Nope" }
        }),
    )?;
    assert_eq!(not_found, json!({ "error": "Class not found: org.example.Nope" }));

    handle.shutdown();
    handle.join()?;
    std::fs::remove_dir_all(base)?;
    Ok(())
}

#[cfg(unix)]
#[test]
fn cli_invoke_reuses_persistent_cache() -> anyhow::Result<()> {
    let base = temp_dir("cli_invoke");
    let (jar, java) = fixture(&base)?;
    let db = base.join("db.lmdb");
    let fake_cfr = base.join("cfr.jar");
    write_file(&fake_cfr, "stub")?;

    let bin = env!("CARGO_BIN_EXE_class-inspector");
    let java_env = java.to_string_lossy().to_string();
    let envs = [("CLASS_INSPECTOR_JAVA", java_env.as_str())];

    let db_arg = db.to_string_lossy().to_string();
    let cfr_arg = fake_cfr.to_string_lossy().to_string();
    let jar_arg = jar.to_string_lossy().to_string();
    let args = [
        "--db",
        db_arg.as_str(),
        "--cfr",
        cfr_arg.as_str(),
        "invoke",
        jar_arg.as_str(),
        "get_class_source",
        "--params",
        r#"{"class_name":"org.example.Greeter"}"#,
    ];

    let first = run_json(bin, &args, &envs)?;
    assert_eq!(first["class_name"], "org.example.Greeter");
    assert!(
        first["source"]
            .as_str()
            .unwrap_or_default()
            .starts_with("package org.example;")
    );

    // A broken decompiler is never consulted once the source is cached.
    write_file(&java, "#!/bin/sh\necho broken >&2\nexit 1\n")?;
    make_executable(&java)?;
    let second = run_json(bin, &args, &envs)?;
    assert_eq!(second["source"], first["source"]);

    let tools = run_json(bin, &["tools"], &[])?;
    assert_eq!(tools["tools"][0]["name"], "get_android_manifest");

    std::fs::remove_dir_all(base)?;
    Ok(())
}
