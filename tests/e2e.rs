//! End-to-end tests that run the `garnet` binary on real script files.

use std::io::Write;
use std::process::Command;

fn run_garnet(source: &str) -> (String, String, bool) {
    let mut file = tempfile::Builder::new()
        .suffix(".rb")
        .tempfile()
        .expect("temp file");
    file.write_all(source.as_bytes()).expect("write script");

    let output = Command::new(env!("CARGO_BIN_EXE_garnet"))
        .args(["run", file.path().to_str().unwrap()])
        .output()
        .expect("failed to execute garnet");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn assert_success(source: &str) -> String {
    let (stdout, stderr, success) = run_garnet(source);
    assert!(success, "program should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(source: &str) -> String {
    let (_, stderr, success) = run_garnet(source);
    assert!(!success, "program should fail");
    stderr
}

#[test]
fn test_arithmetic_and_precedence() {
    let stdout = assert_success("x = 10 + 20 * 2\nputs x\nputs x % 7\nputs -x / 4");
    assert_eq!(stdout, "50\n1\n-12\n");
}

#[test]
fn test_string_interpolation() {
    let source = r#"
a = "hi"
n = 3
puts "x=#{a}-#{n}"
"#;
    assert_eq!(assert_success(source), "x=hi-3\n");
}

#[test]
fn test_method_definition_and_factorial() {
    let source = r#"
def fact(n)
  if n <= 1
    1
  else
    n * fact(n - 1)
  end
end
puts fact(5)
"#;
    assert_eq!(assert_success(source), "120\n");
}

#[test]
fn test_class_inheritance_and_super() {
    let source = r#"
class A
  def f(x)
    x + 1
  end
end

class B < A
  def f(x)
    super(x) + 10
  end
end

puts B.new.f(0)
"#;
    assert_eq!(assert_success(source), "11\n");
}

#[test]
fn test_initialize_runs_and_new_returns_instance() {
    let source = r#"
class Point
  attr_reader :x, :y
  def initialize(x, y)
    @x = x
    @y = y
  end
  def to_s
    "(#{@x}, #{@y})"
  end
end
p1 = Point.new(1, 2)
puts p1.x + p1.y
puts p1
"#;
    assert_eq!(assert_success(source), "3\n(1, 2)\n");
}

#[test]
fn test_array_sort_and_iteration() {
    let source = r#"
a = [3, 1, 2].sort
puts a.join(",")
total = 0
a.each { |x| total += x }
puts total
puts a.map { |x| x * 2 }.join(",")
"#;
    assert_eq!(assert_success(source), "1,2,3\n6\n2,4,6\n");
}

#[test]
fn test_hash_lookup() {
    let source = r#"
h = { "answer" => 42, :other => 1 }
puts h["answer"]
puts h[:other]
puts h["missing"].nil?
"#;
    assert_eq!(assert_success(source), "42\n1\ntrue\n");
}

#[test]
fn test_range_iteration() {
    let source = r#"
(1..3).each { |i| puts i }
puts (1...3).to_a.join(",")
"#;
    assert_eq!(assert_success(source), "1\n2\n3\n1,2\n");
}

#[test]
fn test_coroutine_yields_in_order() {
    let source = r#"
co = coroutine_new {
  yield 1
  yield 2
  3
}
puts co.resume
puts co.resume
puts co.resume
puts co.alive?
"#;
    assert_eq!(assert_success(source), "1\n2\n3\nfalse\n");
}

#[test]
fn test_coroutine_yield_through_iterator() {
    let source = r#"
co = coroutine_new {
  [10, 20, 30].each { |x| yield x }
  nil
}
while co.alive?
  v = co.resume
  puts v unless v.nil?
end
"#;
    assert_eq!(assert_success(source), "10\n20\n30\n");
}

#[test]
fn test_rescue_and_ensure() {
    let source = r#"
begin
  raise "boom"
rescue => e
  puts "caught #{e}"
ensure
  puts "done"
end
"#;
    assert_eq!(assert_success(source), "caught boom\ndone\n");
}

#[test]
fn test_uncaught_error_reports_file_and_line() {
    let stderr = assert_failure("x = 1\nraise \"kaput\"\n");
    assert!(stderr.contains("kaput"), "stderr: {}", stderr);
    assert!(stderr.contains(":2"), "stderr should carry the line: {}", stderr);
}

#[test]
fn test_division_by_zero_fails() {
    let stderr = assert_failure("puts 1 / 0");
    assert!(stderr.contains("divided by 0"), "stderr: {}", stderr);
}

#[test]
fn test_undefined_method_fails() {
    let stderr = assert_failure("launch_rockets");
    assert!(stderr.contains("launch_rockets"), "stderr: {}", stderr);
}

#[test]
fn test_method_redefinition_takes_effect() {
    let source = r#"
class A
  def f
    1
  end
end
a = A.new
puts a.f
class A
  def f
    2
  end
end
puts a.f
"#;
    assert_eq!(assert_success(source), "1\n2\n");
}

#[test]
fn test_method_missing_hook() {
    let source = r#"
class Ghost
  def method_missing(name, *args)
    "no #{name} with #{args.size} args"
  end
end
puts Ghost.new.whatever(1, 2)
"#;
    assert_eq!(assert_success(source), "no whatever with 2 args\n");
}

#[test]
fn test_module_mixin() {
    let source = r##"
module Walkable
  def walk
    "#{name} walks"
  end
end

class Cat
  include Walkable
  def name
    "felix"
  end
end

puts Cat.new.walk
"##;
    assert_eq!(assert_success(source), "felix walks\n");
}

#[test]
fn test_frozen_object_rejects_mutation() {
    let source = r#"
a = [1, 2]
a.freeze
begin
  a.push(3)
rescue => e
  puts e
end
puts a.size
"#;
    let stdout = assert_success(source);
    assert!(stdout.contains("frozen"), "stdout: {}", stdout);
    assert!(stdout.ends_with("2\n"), "stdout: {}", stdout);
}

#[test]
fn test_blocks_close_over_locals() {
    let source = r#"
def tally(xs)
  n = 0
  xs.each { |v| n = n + v }
  n
end
puts tally([1, 2, 3, 4])
"#;
    assert_eq!(assert_success(source), "10\n");
}

#[test]
fn test_symbol_to_proc() {
    let source = r#"
puts ["a", "b"].map(&:upcase).join("")
"#;
    assert_eq!(assert_success(source), "AB\n");
}

#[test]
fn test_argv_is_visible() {
    let mut file = tempfile::Builder::new()
        .suffix(".rb")
        .tempfile()
        .expect("temp file");
    file.write_all(b"puts ARGV.join(\",\")").expect("write script");
    let output = Command::new(env!("CARGO_BIN_EXE_garnet"))
        .args(["run", file.path().to_str().unwrap(), "a", "b"])
        .output()
        .expect("failed to execute garnet");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "a,b\n");
}

#[test]
fn test_check_reports_parse_errors_without_running() {
    let mut file = tempfile::Builder::new()
        .suffix(".rb")
        .tempfile()
        .expect("temp file");
    file.write_all(b"def broken(\n").expect("write script");
    let output = Command::new(env!("CARGO_BIN_EXE_garnet"))
        .args(["check", file.path().to_str().unwrap()])
        .output()
        .expect("failed to execute garnet");
    assert!(!output.status.success());
}

#[test]
fn test_require_searches_include_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("helper.rb"), "def seven\n 7\n end\n").expect("write lib");

    let mut file = tempfile::Builder::new()
        .suffix(".rb")
        .tempfile()
        .expect("temp file");
    file.write_all(b"require \"helper\"\nputs seven")
        .expect("write script");

    let output = Command::new(env!("CARGO_BIN_EXE_garnet"))
        .args([
            "run",
            "-I",
            dir.path().to_str().unwrap(),
            file.path().to_str().unwrap(),
        ])
        .output()
        .expect("failed to execute garnet");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {}", stderr);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "7\n");
}

#[test]
fn test_gc_survives_allocation_churn() {
    let source = r#"
keep = []
i = 0
while i < 2000
  keep.push("s#{i}") if i % 100 == 0
  tmp = [i, i + 1, i + 2]
  i += 1
end
puts keep.size
puts keep.last
"#;
    let output = Command::new(env!("CARGO_BIN_EXE_garnet"))
        .args(["run", "--gc-threshold", "64", "-c", source])
        .output()
        .expect("failed to execute garnet");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {}", stderr);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "20\ns1900\n");
}
