//! Embedding tests that exercise the host API the way an application would:
//! a virtual filesystem, host functions, host-defined classes, and values
//! crossing the boundary in both directions.

use std::cell::RefCell;
use std::rc::Rc;

use garnet::{DiskFs, Error, Interp, MemFs, RuntimeConfig, Value};

fn interp_with_files(files: &[(&str, &str)]) -> Interp {
    let mut fs = MemFs::new();
    for (path, content) in files {
        fs.insert(*path, *content);
    }
    Interp::with_vfs(RuntimeConfig::default(), Box::new(fs))
}

#[test]
fn test_require_loads_once() {
    let mut it = interp_with_files(&[(
        "lib/util.rb",
        "$loads = ($loads.nil? ? 0 : $loads) + 1\ndef triple(x)\n x * 3\n end\n",
    )]);
    it.add_search_path("lib");

    assert_eq!(it.eval("host", "require \"util\"").unwrap(), Value::Bool(true));
    assert_eq!(it.eval("host", "require \"util\"").unwrap(), Value::Bool(false));
    assert_eq!(it.eval("host", "$loads").unwrap(), Value::Int(1));
    assert_eq!(it.eval("host", "triple(7)").unwrap(), Value::Int(21));
}

#[test]
fn test_load_reruns_every_time() {
    let mut it = interp_with_files(&[(
        "lib/count.rb",
        "$loads = ($loads.nil? ? 0 : $loads) + 1\n",
    )]);
    it.add_search_path("lib");

    it.eval("host", "load \"count.rb\"\nload \"count.rb\"").unwrap();
    assert_eq!(it.eval("host", "$loads").unwrap(), Value::Int(2));
}

#[test]
fn test_require_missing_file_errors() {
    let mut it = interp_with_files(&[]);
    let err = it.require("nowhere").unwrap_err();
    assert!(err.message.contains("nowhere"));
}

#[test]
fn test_require_from_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("disk.rb"), "def nine\n 9\n end\n").expect("write lib");

    let mut it = Interp::with_vfs(RuntimeConfig::default(), Box::new(DiskFs));
    it.add_search_path(dir.path().to_str().unwrap());
    assert!(it.require("disk").unwrap());
    assert_eq!(it.invoke_global("nine", &[]).unwrap(), Value::Int(9));
}

#[test]
fn test_register_module_runs_on_first_require() {
    let mut it = interp_with_files(&[]);
    let ran = Rc::new(RefCell::new(0));
    let ran_in = ran.clone();
    it.register_module("audio", move |it| {
        *ran_in.borrow_mut() += 1;
        it.register_function("beep", |_, _| Ok(Value::Int(440)));
        Ok(())
    });

    assert!(it.require("audio").unwrap());
    assert!(!it.require("audio").unwrap());
    assert_eq!(*ran.borrow(), 1);
    assert_eq!(it.eval("host", "beep").unwrap(), Value::Int(440));
}

#[test]
fn test_host_function_receives_script_values() {
    let mut it = interp_with_files(&[]);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_in = seen.clone();
    it.register_function("record", move |_, args| {
        seen_in.borrow_mut().extend_from_slice(args);
        Ok(Value::Nil)
    });

    it.eval("host", "record(1, 2.5, nil)").unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![Value::Int(1), Value::Float(2.5), Value::Nil]
    );
}

#[test]
fn test_host_function_error_propagates_to_script() {
    let mut it = interp_with_files(&[]);
    it.register_function("forbidden", |_, _| {
        Err(Error::runtime("operation not permitted"))
    });

    let out = it
        .eval(
            "host",
            "begin\n forbidden\n rescue => e\n e\n end",
        )
        .unwrap();
    assert!(it.display_value(out).contains("not permitted"));
}

#[test]
fn test_invoke_method_on_script_object() {
    let mut it = interp_with_files(&[]);
    it.eval(
        "host",
        "class Counter\n def initialize\n @n = 0\n end\n def bump(by)\n @n += by\n end\n def n\n @n\n end\nend\n$c = Counter.new",
    )
    .unwrap();
    let counter = it.get_global("$c").unwrap();

    it.invoke_method(counter, "bump", &[Value::Int(5)]).unwrap();
    it.invoke_method(counter, "bump", &[Value::Int(2)]).unwrap();
    assert_eq!(it.invoke_method(counter, "n", &[]).unwrap(), Value::Int(7));
}

#[test]
fn test_host_defined_class_usable_from_script() {
    let mut it = interp_with_files(&[]);
    let timer = it.define_class("Timer", None).unwrap();
    it.define_method(timer, "frequency", |_, _| Ok(Value::Int(60)))
        .unwrap();

    assert_eq!(
        it.eval("host", "Timer.new.frequency * 2").unwrap(),
        Value::Int(120)
    );
}

#[test]
fn test_values_constructed_by_host_flow_into_script() {
    let mut it = interp_with_files(&[]);
    let greeting = it.str_value("hello");
    let items = it.array_value(vec![Value::Int(1), Value::Int(2)]);
    it.set_global("greeting", greeting);
    it.set_global("items", items);

    let out = it
        .eval("host", "\"#{greeting}! sum=#{items.first + items.last}\"")
        .unwrap();
    assert_eq!(it.display_value(out), "hello! sum=3");
}

#[test]
fn test_call_script_proc_from_host() {
    let mut it = interp_with_files(&[]);
    let adder = it.eval("host", "->(a, b) { a + b }").unwrap();
    assert_eq!(
        it.call(adder, &[Value::Int(2), Value::Int(40)]).unwrap(),
        Value::Int(42)
    );
}

#[test]
fn test_coroutine_driven_by_host() {
    let mut it = interp_with_files(&[]);
    let body = it
        .eval("host", "->(start) { yield start\n yield start + 1\n start + 2 }")
        .unwrap();
    let co = it.coroutine_new(body).unwrap();

    assert_eq!(it.coroutine_resume(co, &[Value::Int(10)]).unwrap(), Value::Int(10));
    assert!(it.coroutine_alive(co));
    assert_eq!(it.coroutine_resume(co, &[]).unwrap(), Value::Int(11));
    assert_eq!(it.coroutine_resume(co, &[]).unwrap(), Value::Int(12));
    assert!(!it.coroutine_alive(co));
    assert_eq!(it.coroutine_resume(co, &[]).unwrap(), Value::Nil);
}

#[test]
fn test_last_error_sticks_until_cleared() {
    let mut it = interp_with_files(&[]);
    assert!(it.eval("host", "raise \"first\"").is_err());
    assert!(it.last_error().unwrap().message.contains("first"));

    // a successful eval does not clear the recorded error
    it.eval("host", "1").unwrap();
    assert!(it.last_error().is_some());
    it.clear_error();
    assert!(it.last_error().is_none());
}

#[test]
fn test_state_survives_collection() {
    let mut config = RuntimeConfig::default();
    config.gc_threshold = 32;
    let mut it = Interp::with_vfs(config, Box::new(MemFs::new()));

    it.eval(
        "host",
        "$keep = []\ni = 0\nwhile i < 500\n $keep.push(\"v#{i}\") if i % 50 == 0\n tmp = [i, \"x#{i}\"]\n i += 1\nend",
    )
    .unwrap();
    it.collect_garbage();

    let out = it.eval("host", "$keep.last").unwrap();
    assert_eq!(it.display_value(out), "v450");
    assert_eq!(it.eval("host", "$keep.size").unwrap(), Value::Int(10));
    assert!(it.gc_stats().cycles >= 1);
}

#[test]
fn test_debug_hook_sees_opcodes() {
    let mut it = interp_with_files(&[]);
    let ops = Rc::new(RefCell::new(Vec::new()));
    let ops_in = ops.clone();
    it.set_debug_hook(Some(Box::new(move |file, line, op| {
        ops_in.borrow_mut().push((file.to_string(), line, op.to_string()));
    })));

    it.eval("trace.rb", "1 + 2").unwrap();
    it.set_debug_hook(None);

    let ops = ops.borrow();
    assert!(ops.iter().any(|(_, _, op)| op == "Add"));
    assert!(ops.iter().all(|(file, _, _)| file == "trace.rb"));
}
