//! WASM stored procedure plumbing. Compiling, signature inference, and
//! fuel-bounded invocation are implemented here; the sandbox's execution
//! *model* (what imports are available, how host calls are mediated) is
//! explicitly out of scope per spec.md §1 — this is the minimal contract
//! needed to register and call a procedure, not a full host environment.

use super::ProcParam;
use crate::error::{ApiError, ApiResult};
use serde_json::Value as Json;
use wasmtime::{Config, Engine, Instance, Module, Store, Val, ValType};

/// Entry point every registered procedure must export.
const ENTRY_POINT: &str = "call";

/// Fuel budget for a single invocation — bounds runaway procedures
/// without needing wall-clock preemption.
const FUEL_BUDGET: u64 = 10_000_000;

fn wasm_engine() -> ApiResult<Engine> {
    let mut config = Config::new();
    config.consume_fuel(true);
    Engine::new(&config).map_err(|e| ApiError::Internal(format!("initializing wasm engine: {e}")))
}

/// Inspect the module's exported `call` function to infer parameter and
/// return types, used when the request doesn't declare them explicitly
/// (spec.md §4.2 "forwards metadata including inferred parameter list
/// and return type").
pub fn infer_signature(wasm_bytes: &[u8]) -> ApiResult<(Vec<ProcParam>, Option<String>)> {
    let engine = wasm_engine()?;
    let module = Module::new(&engine, wasm_bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid wasm module: {e}")))?;

    let export = module
        .exports()
        .find(|e| e.name() == ENTRY_POINT)
        .ok_or_else(|| ApiError::BadRequest(format!("module does not export `{ENTRY_POINT}`")))?;

    let func_ty = export
        .ty()
        .func()
        .cloned()
        .ok_or_else(|| ApiError::BadRequest(format!("export `{ENTRY_POINT}` is not a function")))?;

    let params = func_ty
        .params()
        .enumerate()
        .map(|(i, ty)| ProcParam { name: format!("arg{i}"), ty: valtype_name(&ty) })
        .collect();

    let return_type = func_ty.results().next().map(|ty| valtype_name(&ty));

    Ok((params, return_type))
}

fn valtype_name(ty: &ValType) -> String {
    match ty {
        ValType::I32 => "i32".to_string(),
        ValType::I64 => "i64".to_string(),
        ValType::F32 => "f32".to_string(),
        ValType::F64 => "f64".to_string(),
        other => format!("{other:?}"),
    }
}

fn json_to_val(v: &Json, ty: &ValType) -> ApiResult<Val> {
    match ty {
        ValType::I32 => Ok(Val::I32(v.as_i64().ok_or_else(arg_err)? as i32)),
        ValType::I64 => Ok(Val::I64(v.as_i64().ok_or_else(arg_err)?)),
        ValType::F32 => Ok(Val::F32((v.as_f64().ok_or_else(arg_err)? as f32).to_bits())),
        ValType::F64 => Ok(Val::F64(v.as_f64().ok_or_else(arg_err)?.to_bits())),
        other => Err(ApiError::BadRequest(format!("unsupported parameter type {other:?}"))),
    }
}

fn arg_err() -> ApiError {
    ApiError::BadRequest("procedure argument type mismatch".to_string())
}

fn val_to_json(v: &Val) -> Json {
    match v {
        Val::I32(i) => Json::from(*i),
        Val::I64(i) => Json::from(*i),
        Val::F32(bits) => Json::from(f32::from_bits(*bits) as f64),
        Val::F64(bits) => Json::from(f64::from_bits(*bits)),
        _ => Json::Null,
    }
}

/// Instantiate the module fresh and call its `call` export with a fuel
/// budget. Each invocation gets an isolated `Store` — no state survives
/// between calls.
pub fn invoke(wasm_bytes: &[u8], params: &[ProcParam], args: &[Json]) -> ApiResult<Json> {
    if args.len() != params.len() {
        return Err(ApiError::BadRequest(format!(
            "expected {} argument(s), got {}",
            params.len(),
            args.len()
        )));
    }

    let engine = wasm_engine()?;
    let module = Module::new(&engine, wasm_bytes)
        .map_err(|e| ApiError::Internal(format!("recompiling stored procedure: {e}")))?;

    let mut store = Store::new(&engine, ());
    store
        .set_fuel(FUEL_BUDGET)
        .map_err(|e| ApiError::Internal(format!("configuring fuel: {e}")))?;

    let instance = Instance::new(&mut store, &module, &[])
        .map_err(|e| ApiError::Internal(format!("instantiating stored procedure: {e}")))?;

    let func = instance
        .get_func(&mut store, ENTRY_POINT)
        .ok_or_else(|| ApiError::Internal(format!("module does not export `{ENTRY_POINT}`")))?;

    let func_ty = func.ty(&store);
    let wasm_args: Vec<Val> = args
        .iter()
        .zip(func_ty.params())
        .map(|(a, ty)| json_to_val(a, &ty))
        .collect::<ApiResult<_>>()?;

    let mut results = vec![Val::I32(0); func_ty.results().len()];
    func.call(&mut store, &wasm_args, &mut results).map_err(|e| {
        if e.to_string().contains("fuel") {
            ApiError::Timeout
        } else {
            ApiError::InvalidSql(format!("procedure execution failed: {e}"))
        }
    })?;

    Ok(match results.first() {
        Some(v) => val_to_json(v),
        None => Json::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // (module (func (export "call") (param i32 i32) (result i32)
    //   local.get 0 local.get 1 i32.add))
    const ADD_WAT: &str = r#"(module (func (export "call") (param i32 i32) (result i32)
        local.get 0 local.get 1 i32.add))"#;

    fn add_module_bytes() -> Vec<u8> {
        wat::parse_str(ADD_WAT).expect("valid wat")
    }

    #[test]
    fn infers_signature_from_export() {
        let bytes = add_module_bytes();
        let (params, ret) = infer_signature(&bytes).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(ret.as_deref(), Some("i32"));
    }

    #[test]
    fn invokes_and_returns_result() {
        let bytes = add_module_bytes();
        let (params, _ret) = infer_signature(&bytes).unwrap();
        let result = invoke(&bytes, &params, &[Json::from(2), Json::from(40)]).unwrap();
        assert_eq!(result, Json::from(42));
    }

    #[test]
    fn rejects_wrong_argument_count() {
        let bytes = add_module_bytes();
        let (params, _ret) = infer_signature(&bytes).unwrap();
        let err = invoke(&bytes, &params, &[Json::from(1)]).unwrap_err();
        matches!(err, ApiError::BadRequest(_));
    }
}
