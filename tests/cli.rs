use std::io::Write;
use std::process::{Command, Output, Stdio};

fn cube() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cube"))
}

fn eval(code: &str) -> Output {
    cube().args(["-e", code]).output().expect("failed to run cube")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

fn assert_ok(out: &Output) {
    assert!(out.status.success(), "stderr: {}", stderr(out));
}

// --- End-to-end scenarios ---

#[test]
fn eval_returns_arithmetic_result() {
    let out = eval("var x = 1 + 2; return x;");
    assert_ok(&out);
    assert_eq!(stdout(&out), "3");
}

#[test]
fn class_init_sets_field() {
    let out = eval("class Point { var x; func init(x) { this.x = x; } }\nvar p = Point(7)\nreturn p.x");
    assert_ok(&out);
    assert_eq!(stdout(&out), "7");
}

#[test]
fn returned_closure_keeps_captured_local() {
    let out = eval("func outer() { var a = 1; func inner() { return a; } return inner; }\nreturn outer()()");
    assert_ok(&out);
    assert_eq!(stdout(&out), "1");
}

#[test]
fn catch_receives_thrown_message() {
    let out = eval("try { throw(\"boom\"); } catch (e) { return e; }");
    assert_ok(&out);
    assert!(stdout(&out).contains("boom"));
}

#[test]
fn tasks_awaited_out_of_order() {
    let code = "func count(n) { var s = 0; for (var i = 1; i <= n; i++) s += i; return s; }\n\
                var first = async count(500)\nvar second = async count(5)\n\
                var b = await second\nvar a = await first\n\
                return [a, b, first.done, second.done]";
    let out = eval(code);
    assert_ok(&out);
    assert_eq!(stdout(&out), "[125250, 15, true, true]");
}

#[test]
fn gc_after_temporary_lists_frees_memory() {
    let code = "var keep = ['a', 'b']\nfor (var i = 0; i < 10000; i++) { var tmp = [i]; }\n\
                var before = memory()\ngc()\nvar after = memory()\nreturn [after < before, keep]";
    let out = eval(code);
    assert_ok(&out);
    assert_eq!(stdout(&out), "[true, ['a', 'b']]");
}

// --- Laws and boundaries ---

#[test]
fn loop_closures_capture_per_iteration() {
    let fresh = "var fs = []\nfor (var i = 0; i < 3; i++) { var v = i * 10; fs.push(@() => v) }\n\
                 return [fs[0](), fs[1](), fs[2]()]";
    assert_eq!(stdout(&eval(fresh)), "[0, 10, 20]");
    let shared = "var fs = []\nvar v = 0\nfor (var i = 0; i < 3; i++) { v = i * 10; fs.push(@() => v) }\n\
                  return [fs[0](), fs[1](), fs[2]()]";
    assert_eq!(stdout(&eval(shared)), "[20, 20, 20]");
}

#[test]
fn pop_on_empty_list_is_a_runtime_error() {
    let out = eval("var l = []\nl.pop()");
    assert_eq!(out.status.code(), Some(70));
    assert!(stderr(&out).contains("pop() called on an empty list."), "{}", stderr(&out));
}

#[test]
fn negative_index_reads_from_the_end() {
    let out = eval("var l = [1, 2, 3]\nreturn l[-1]");
    assert_ok(&out);
    assert_eq!(stdout(&out), "3");
}

#[test]
fn wait_reports_elapsed_seconds() {
    let out = eval("var t = wait(0.02)\nreturn t >= 0.02");
    assert_ok(&out);
    assert_eq!(stdout(&out), "true");
}

// --- Output and arguments ---

#[test]
fn print_writes_to_stdout_without_separators() {
    let out = eval("print('a', 1)\nprintln(true, [1, 'x'])");
    assert_ok(&out);
    assert_eq!(stdout(&out), "a1true[1, 'x']");
}

#[test]
fn script_sees_its_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("args.cube");
    std::fs::write(&script, "println(args)\nprintln(__name__)").unwrap();
    let out = cube().arg(&script).args(["one", "--two"]).output().unwrap();
    assert_ok(&out);
    let text = stdout(&out);
    assert!(text.starts_with("['one', '--two']"), "{text}");
    assert!(text.ends_with("args.cube"), "{text}");
}

// --- Modules ---

#[test]
fn import_binds_package_by_file_name() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("util.cube"), "var base = 20\nfunc add(x) { return base + x }").unwrap();
    let main = dir.path().join("main.cube");
    std::fs::write(&main, "import util\nimport util as u\nprintln(util.add(1), ' ', u.base)").unwrap();
    let out = cube().arg(&main).output().unwrap();
    assert_ok(&out);
    assert_eq!(stdout(&out), "21 20");
}

#[test]
fn require_returns_the_package() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("shapes.cube"), "func area(w, h) => w * h").unwrap();
    let main = dir.path().join("main.cube");
    std::fs::write(&main, "var s = require('shapes')\nprintln(s.area(3, 4))").unwrap();
    let out = cube().arg(&main).output().unwrap();
    assert_ok(&out);
    assert_eq!(stdout(&out), "12");
}

#[test]
fn include_directory_is_searched() {
    let lib = tempfile::tempdir().unwrap();
    std::fs::write(lib.path().join("greet.cube"), "func hi(n) { return 'hi ' + n }").unwrap();
    let out = cube().arg("-I").arg(lib.path()).args(["-e", "import greet\nreturn greet.hi('bo')"]).output().unwrap();
    assert_ok(&out);
    assert_eq!(stdout(&out), "hi bo");
}

#[test]
fn missing_import_can_be_caught() {
    let out = eval("try { import nothing_here } catch (e) { return e }");
    assert_ok(&out);
    assert_eq!(stdout(&out), "Could not load the file \"nothing_here.cube\".");
}

// --- Errors and exit codes ---

#[test]
fn compile_error_exits_65() {
    let out = eval("var = 3");
    assert_eq!(out.status.code(), Some(65));
    assert!(stderr(&out).contains("compile error"), "{}", stderr(&out));
}

#[test]
fn runtime_error_exits_70_with_trace() {
    let out = eval("func f() {\n  return missing\n}\nf()");
    assert_eq!(out.status.code(), Some(70));
    let err = stderr(&out);
    assert!(err.contains("[line 2] in f(): Undefined variable 'missing'."), "{err}");
    assert!(err.contains("Task[default]"), "{err}");
}

#[test]
fn unreadable_file_exits_74() {
    let out = cube().arg("/definitely/not/here.cube").output().unwrap();
    assert_eq!(out.status.code(), Some(74));
}

#[test]
fn json_diagnostics_parse() {
    let out = cube().args(["--json", "-e", "var x = ;"]).output().unwrap();
    assert_eq!(out.status.code(), Some(65));
    let first = stderr(&out).lines().next().unwrap_or_default().to_string();
    let v: serde_json::Value = serde_json::from_str(&first).expect("valid JSON");
    assert_eq!(v["severity"], "error");
    assert_eq!(v["phase"], "compile");
    assert_eq!(v["line"], 1);
    assert_eq!(v["path"], "<eval>");
}

#[test]
fn json_runtime_error_carries_trace() {
    let out = cube().args(["--json", "-e", "throw('bad')"]).output().unwrap();
    assert_eq!(out.status.code(), Some(70));
    let v: serde_json::Value = serde_json::from_str(stderr(&out).trim()).expect("valid JSON");
    assert_eq!(v["phase"], "runtime");
    assert_eq!(v["message"], "bad");
    assert_eq!(v["notes"].as_array().map(Vec::len), Some(2));
}

// --- Tooling flags and REPL ---

#[test]
fn disassemble_lists_bytecode() {
    let out = cube().args(["--disassemble", "-e", "func f() { return 1 }\nreturn f()"]).output().unwrap();
    assert_ok(&out);
    let err = stderr(&out);
    assert!(err.contains("== <eval> =="), "{err}");
    assert!(err.contains("== f =="), "{err}");
    assert!(err.contains("RETURN"), "{err}");
}

#[test]
fn gc_log_reports_collections() {
    let code = "for (var i = 0; i < 2000; i++) { var t = [i, i, i]; }";
    let out = cube().args(["--gc-log", "--gc-threshold", "4096", "-e", code]).output().unwrap();
    assert_ok(&out);
    assert!(stderr(&out).contains("[GC]"), "{}", stderr(&out));
}

#[test]
fn repl_prints_expression_values_and_survives_errors() {
    let mut child = cube()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run cube");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"1 + 2\nvar y = 5\nundefined_name\ny * 2\n")
        .unwrap();
    let out = child.wait_with_output().unwrap();
    assert_ok(&out);
    assert_eq!(stdout(&out), "3\n10");
    assert!(stderr(&out).contains("Undefined variable 'undefined_name'."));
}

#[test]
fn repl_unreadable_input_exits_with_io_status() {
    let mut child = cube()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run cube");
    child.stdin.take().unwrap().write_all(b"1 + 2\n\xff\xfe\n4\n").unwrap();
    let out = child.wait_with_output().unwrap();
    assert_eq!(out.status.code(), Some(74));
    assert_eq!(stdout(&out), "3");
    assert!(stderr(&out).contains("Could not read input"), "{}", stderr(&out));
}
