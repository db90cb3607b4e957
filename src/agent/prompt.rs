//! Instruction text sent with each node's Proposer request.

/// Seeds every conversation.
pub const BASE_INSTRUCTION: &str = "Be extremely laconic in your responses.";

pub const ANALYZE_CODE: &str = "You are a strict Python code reviewer. \
You will be given the current buggy code together with its tests or its docstring. \
Analyze the code and find the bug.";

pub const ANALYZE_ERROR: &str = "You are a debugging expert for Python programs. \
You will be given the result of executing the program and its tests (stdout, stderr, exit code). \
Analyze the failure and propose how to fix it. \
Call parse_stack_trace when stderr contains a traceback.";

pub const CREATE_TESTS: &str = r#"You are a Python QA engineer. Write unit tests for the given function(s) covering as many cases as possible, strictly following these rules:
1. All test code must be valid Python.
2. Put every test inside one function named check.
3. Use plain assert statements (no unittest.TestCase).
4. Cover normal cases, edge cases and error cases where relevant.
5. Do not add a main guard. After the function definition call it directly, e.g. check(function_name), using the name from the code under test, even if that function is missing from the code.
6. Answer strictly in this format:
```json
{"content": "<ONLY the test code. Do not include the code under test.>"}
```
The tests are appended to the code under test and run with: python FILENAME."#;

pub const UPDATE_TESTS: &str = r#"You are an expert Python QA engineer. You will be given the current unit tests and a description of the failure.
Decide whether the failure is caused by incorrect tests rather than by the code under test.
If the tests are wrong, fix them. If they are already correct, return them unchanged.
Answer strictly in this format:
```json
{"content": "<FULL tests code>"}
```
Always return the complete tests code, even when nothing changed. Do not add explanations outside the JSON. Keep the style and imports of the original tests."#;

pub const FIX_ERROR: &str = r#"You are a Python developer correcting a program. You will be given the current code and a description of the error.
Produce the corrected code. Always return the complete code, even if the fix is a single line, and never include tests in it.
Answer strictly in this format:
```json
{"content": "<ONLY the full updated code>"}
```"#;

pub const POSTPROCESS_CODE: &str = r#"You are a Python developer cleaning up a program. If the code contains unit tests, remove them. Otherwise return the code unchanged.
Answer strictly in this format:
```json
{"content": "<ONLY the full code>"}
```"#;

pub fn analyze_request(code: &str, docstring: Option<&str>, tests: Option<&str>) -> String {
    let mut request = format!("Initial buggy code: {code}");
    if let Some(docstring) = docstring {
        request.push_str(&format!("\nDocstring for the function: {docstring}"));
    }
    if let Some(tests) = tests {
        request.push_str(&format!("\nTests for the function: {tests}"));
    }
    request
}

pub fn create_tests_request(code: &str, docstring: Option<&str>) -> String {
    format!(
        "code: {code}\ndocstring: {}",
        docstring.unwrap_or("(none)")
    )
}

pub fn diagnose_request(stdout: &str, stderr: &str) -> String {
    format!("Here are stdout and stderr to fix: {stdout} and {stderr}")
}

pub fn update_tests_request(tests: Option<&str>) -> String {
    format!("Tests code: {}", tests.unwrap_or("(no tests)"))
}

pub fn fix_code_request(code: &str) -> String {
    format!("Current code: {code}\nReturn the full corrected code given the tests above.")
}

pub fn postprocess_request(code: &str) -> String {
    format!("Code: {code}")
}
